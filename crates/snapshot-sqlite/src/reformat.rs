//! Conversion of a freshly expanded snapshot into the normalized schema.
//!
//! The flat `data` table is copied into `ips` (which gets dense ids) and
//! dropped, then every hostname is reduced to its primary domain and linked
//! through `domains` and `ips_domains`. Work happens chunk by chunk, each
//! chunk committed on its own, so memory stays bounded regardless of how many
//! hostnames a row carries.

use crate::batch::{search_batch, ChunkPlanner, Probe};
use crate::domain::{primary_domain, split_hostnames};
use crate::insert::{add_pair, insert_domains, insert_edges, DomainGroups};
use crate::query::text_at;
use crate::schema::{COPY_FLAT_INTO_IPS, CREATE_IPS, FINAL_INDEXES, FLAT_TABLE, RECREATE_DOMAIN_TABLES};
use crate::{Db, ReformatOptions, ReformatOutcome, ReformatStats};
use anyhow::{bail, Result};
use internetdb_core::{PhaseEvent, ReclaimMode, StateStore};
use rusqlite::{params, Connection};
use tracing::{debug, info};

struct Chunk {
    groups: DomainGroups,
    last_id: i64,
}

pub fn reformat(db: &mut Db, store: &StateStore, opts: &ReformatOptions) -> Result<ReformatOutcome> {
    if store.load().is_reformatted() {
        debug!("database already reformatted");
        return Ok(ReformatOutcome::AlreadyDone);
    }
    store.transition(PhaseEvent::ReformatStarted)?;

    let mut stats = ReformatStats {
        copied_from_flat: create_schema(db, store)?,
        ..Default::default()
    };
    stats.ips = db.count_rows("ips")?;
    info!(ips = stats.ips, "linking hostnames to primary domains");
    link_domains(db, opts, &mut stats)?;

    db.conn.execute_batch(FINAL_INDEXES)?;
    if let Some(mode) = opts.reclaim {
        reclaim(db, mode)?;
    }
    store.transition(PhaseEvent::ReformatFinished)?;
    info!(
        ips = stats.ips,
        domains = stats.domains,
        edges = stats.edges,
        chunks = stats.chunks,
        rejected = stats.rejected_chunks,
        "reformat complete"
    );
    Ok(ReformatOutcome::Completed(stats))
}

/// Returns whether the flat table was migrated on this call.
fn create_schema(db: &mut Db, store: &StateStore) -> Result<bool> {
    let copied = if db.table_exists(FLAT_TABLE)? {
        info!("copying flat table into ips");
        let tx = db.conn.transaction()?;
        tx.execute_batch("DROP TABLE IF EXISTS ips_fts; DROP TABLE IF EXISTS ips;")?;
        tx.execute_batch(CREATE_IPS)?;
        tx.execute_batch(COPY_FLAT_INTO_IPS)?;
        tx.execute_batch(&format!("DROP TABLE {FLAT_TABLE};"))?;
        tx.commit()?;
        store.update(|s| {
            s.ips_loaded = true;
            s.search_mode = None;
        })?;
        true
    } else {
        false
    };
    if !db.table_exists("ips")? {
        bail!("database has neither a {FLAT_TABLE} nor an ips table");
    }
    db.conn.execute_batch(RECREATE_DOMAIN_TABLES)?;
    Ok(copied)
}

fn read_chunk(conn: &Connection, after: i64, size: usize) -> Result<Probe<Chunk>> {
    let mut stmt = conn.prepare_cached("SELECT id, hostnames FROM ips WHERE id > ?1 ORDER BY id LIMIT ?2")?;
    let mut rows = stmt.query(params![after, size as i64])?;
    let mut chunk = Chunk { groups: DomainGroups::new(), last_id: after };
    let (mut read, mut expanded) = (0usize, 0usize);
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        read += 1;
        chunk.last_id = id;
        let Some(raw) = text_at(row, 1)? else { continue };
        for host in split_hostnames(&raw) {
            expanded += 1;
            if let Some(domain) = primary_domain(host) {
                add_pair(&mut chunk.groups, domain, id);
            }
        }
    }
    Ok(Probe { rows: read, expanded, payload: chunk })
}

fn link_domains(db: &mut Db, opts: &ReformatOptions, stats: &mut ReformatStats) -> Result<()> {
    let limits = opts.limits;
    let mut planner = ChunkPlanner::new(stats.ips, limits);
    while !planner.is_done() {
        let after = planner.last_id();
        let conn = &db.conn;
        let found = search_batch(planner.hint(), planner.ceiling(), &limits, |size| read_chunk(conn, after, size))?;
        if found.rows == 0 {
            break;
        }
        let chunk = found.payload;
        if planner.exceeds_fan_out(found.size, chunk.groups.len()) {
            let next = planner.reject(found.size);
            stats.rejected_chunks += 1;
            debug!(size = found.size, domains = chunk.groups.len(), next, "too many domains in chunk, retrying smaller");
            continue;
        }

        let tx = db.conn.transaction()?;
        stats.domains += insert_domains(&tx, &chunk.groups, limits.insert_group)?;
        stats.edges += insert_edges(&tx, &chunk.groups)?;
        tx.commit()?;

        planner.accept(found.size, found.rows, chunk.last_id);
        stats.chunks += 1;
        debug!(
            offset = planner.offset(),
            total = stats.ips,
            rows = found.rows,
            hostnames = found.expanded,
            attempts = found.attempts,
            "chunk linked"
        );
    }
    Ok(())
}

fn reclaim(db: &Db, mode: ReclaimMode) -> Result<()> {
    info!(?mode, "reclaiming free pages");
    match mode {
        ReclaimMode::Full => db.conn.execute_batch("VACUUM;")?,
        ReclaimMode::Incremental => {
            let auto_vacuum: i64 = db.conn.pragma_query_value(None, "auto_vacuum", |row| row.get(0))?;
            if auto_vacuum == 2 {
                db.conn.execute_batch("PRAGMA incremental_vacuum;")?;
            } else {
                // auto_vacuum only takes effect through a full rewrite
                debug!(auto_vacuum, "switching to incremental auto_vacuum");
                db.conn.execute_batch("PRAGMA auto_vacuum = INCREMENTAL; VACUUM;")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BatchLimits;
    use internetdb_core::Phase;
    use std::collections::BTreeSet;

    fn setup() -> (tempfile::TempDir, StateStore, Db) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("local-storage.json"));
        let db = Db::open(dir.path().join("internetdb.sqlite")).unwrap();
        db.conn
            .execute_batch("CREATE TABLE data (ip TEXT, ports TEXT, tags TEXT, cpes TEXT, vulns TEXT, hostnames TEXT);")
            .unwrap();
        for ev in [PhaseEvent::DownloadStarted, PhaseEvent::Decompressed] {
            store.transition(ev).unwrap();
        }
        (dir, store, db)
    }

    fn insert_flat(db: &Db, ip: &str, hostnames: Option<&str>) {
        db.conn
            .execute("INSERT INTO data (ip, ports, hostnames) VALUES (?1, '443', ?2)", params![ip, hostnames])
            .unwrap();
    }

    fn edges(db: &Db) -> BTreeSet<(String, String)> {
        db.conn
            .prepare("SELECT ips.ip, domains.domain FROM ips_domains JOIN ips ON ips.id = ips_domains.ip_id JOIN domains ON domains.id = ips_domains.domain_id")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn duplicate_hostnames_collapse_to_one_edge() {
        let (_dir, store, mut db) = setup();
        insert_flat(&db, "1.2.3.4", Some("a.example.com,b.example.com,a.example.com"));

        let outcome = reformat(&mut db, &store, &ReformatOptions::default()).unwrap();
        let ReformatOutcome::Completed(stats) = outcome else { panic!("expected a reformat") };
        assert!(stats.copied_from_flat);
        assert_eq!((stats.ips, stats.domains, stats.edges), (1, 1, 1));

        assert!(!db.table_exists("data").unwrap());
        assert_eq!(db.count_rows("ips").unwrap(), 1);
        assert_eq!(db.count_rows("domains").unwrap(), 1);
        assert_eq!(db.count_rows("ips_domains").unwrap(), 1);
        assert_eq!(edges(&db), BTreeSet::from([("1.2.3.4".to_string(), "example.com".to_string())]));

        let state = store.load();
        assert_eq!(state.phase, Phase::Ready);
        assert!(state.ips_loaded);

        let hits = db.lookup_domain("www.example.com", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ip, "1.2.3.4");
    }

    #[test]
    fn second_run_is_a_no_op() {
        let (_dir, store, mut db) = setup();
        insert_flat(&db, "1.2.3.4", Some("a.example.com"));
        reformat(&mut db, &store, &ReformatOptions::default()).unwrap();
        assert_eq!(reformat(&mut db, &store, &ReformatOptions::default()).unwrap(), ReformatOutcome::AlreadyDone);
        assert_eq!(db.count_rows("ips_domains").unwrap(), 1);
    }

    #[test]
    fn resumes_after_copy_without_flat_table() {
        let (_dir, store, mut db) = setup();
        insert_flat(&db, "5.6.7.8", Some("x.test.org"));
        assert!(create_schema(&mut db, &store).unwrap());
        assert!(!create_schema(&mut db, &store).unwrap());
        assert_eq!(db.count_rows("ips").unwrap(), 1);

        let outcome = reformat(&mut db, &store, &ReformatOptions::default()).unwrap();
        let ReformatOutcome::Completed(stats) = outcome else { panic!("expected a reformat") };
        assert!(!stats.copied_from_flat);
        assert_eq!(stats.edges, 1);
    }

    #[test]
    fn empty_database_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("local-storage.json"));
        let mut db = Db::open_in_memory().unwrap();
        assert!(reformat(&mut db, &store, &ReformatOptions::default()).is_err());
    }

    fn pragma(db: &Db, name: &str) -> i64 {
        db.conn.pragma_query_value(None, name, |row| row.get(0)).unwrap()
    }

    #[test]
    fn incremental_reclaim_leaves_no_free_pages() {
        let (_dir, store, mut db) = setup();
        let padding = "x".repeat(4096);
        for i in 0..200 {
            db.conn
                .execute(
                    "INSERT INTO data (ip, ports, hostnames) VALUES (?1, ?2, ?3)",
                    params![format!("10.1.0.{i}"), padding, format!("h{i}.example.com")],
                )
                .unwrap();
        }
        assert_eq!(pragma(&db, "auto_vacuum"), 0);

        let opts = ReformatOptions { reclaim: Some(ReclaimMode::Incremental), ..Default::default() };
        reformat(&mut db, &store, &opts).unwrap();
        assert_eq!(pragma(&db, "auto_vacuum"), 2);
        assert_eq!(pragma(&db, "freelist_count"), 0);
        assert_eq!(db.count_rows("ips").unwrap(), 200);

        db.conn.execute_batch("DELETE FROM ips WHERE id > 100;").unwrap();
        assert!(pragma(&db, "freelist_count") > 0);
        reclaim(&db, ReclaimMode::Incremental).unwrap();
        assert_eq!(pragma(&db, "freelist_count"), 0);
    }

    #[test]
    fn chunked_linking_keeps_relational_integrity() {
        let (_dir, store, mut db) = setup();
        let mut expected = BTreeSet::new();
        for i in 0..60 {
            let ip = format!("10.0.0.{i}");
            let hostnames = match i % 4 {
                0 => None,
                1 => Some(format!("h{i}.d{i}.com,www.shared.net")),
                2 => Some(format!("a.d{i}.co.uk,b.d{i}.co.uk,,mail.shared.net")),
                _ => Some(format!("h{i}.d{i}.com")),
            };
            if let Some(h) = &hostnames {
                for host in split_hostnames(h) {
                    expected.insert((ip.clone(), primary_domain(host).unwrap()));
                }
            }
            insert_flat(&db, &ip, hostnames.as_deref());
        }

        let opts = ReformatOptions {
            limits: BatchLimits {
                default_rows: 8,
                min_expanded: 10,
                max_expanded: 30,
                max_rows: 100,
                max_primary_domains: 6,
                insert_group: 3,
            },
            reclaim: Some(ReclaimMode::Full),
        };
        let ReformatOutcome::Completed(stats) = reformat(&mut db, &store, &opts).unwrap() else {
            panic!("expected a reformat")
        };
        assert!(stats.chunks > 1);
        assert!(stats.rejected_chunks > 0);
        assert_eq!(stats.ips, 60);
        assert_eq!(edges(&db), expected);
        assert_eq!(stats.edges as usize, expected.len());

        let dangling: i64 = db
            .conn
            .query_row(
                "SELECT COUNT(*) FROM ips_domains e LEFT JOIN ips i ON i.id = e.ip_id LEFT JOIN domains d ON d.id = e.domain_id WHERE i.id IS NULL OR d.id IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(dangling, 0);
        let distinct: i64 = db.conn.query_row("SELECT COUNT(DISTINCT domain) FROM domains", [], |r| r.get(0)).unwrap();
        assert_eq!(distinct as u64, db.count_rows("domains").unwrap());
    }
}
