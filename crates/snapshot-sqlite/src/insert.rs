use crate::IpId;
use anyhow::Result;
use rusqlite::{params_from_iter, Connection, ToSql};
use std::collections::BTreeMap;

/// Rows per multi-row edge insert.
const EDGE_GROUP: usize = 2_000;

/// Distinct primary domains of one chunk, each with the ascending ids of the
/// `ips` rows that carry it.
pub(crate) type DomainGroups = BTreeMap<String, Vec<IpId>>;

pub(crate) fn add_pair(groups: &mut DomainGroups, domain: String, ip_id: IpId) {
    let ids = groups.entry(domain).or_default();
    // Rows arrive in id order, so a repeat is always the last entry.
    if ids.last() != Some(&ip_id) {
        ids.push(ip_id);
    }
}

fn placeholders(rows: usize, per_row: &str) -> String {
    let mut sql = String::with_capacity(rows * (per_row.len() + 1));
    for i in 0..rows {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str(per_row);
    }
    sql
}

/// Inserts the chunk's domains that are not yet known. Returns how many
/// were new.
pub(crate) fn insert_domains(conn: &Connection, groups: &DomainGroups, group_size: usize) -> Result<u64> {
    let names: Vec<&str> = groups.keys().map(String::as_str).collect();
    let mut inserted = 0u64;
    for part in names.chunks(group_size.max(1)) {
        let sql = format!("INSERT OR IGNORE INTO domains(domain) VALUES {}", placeholders(part.len(), "(?)"));
        let mut stmt = conn.prepare_cached(&sql)?;
        inserted += stmt.execute(params_from_iter(part.iter()))? as u64;
    }
    Ok(inserted)
}

/// Inserts `(ip_id, domain_id)` edges, resolving domain ids by join so the
/// ids never round-trip through Rust.
pub(crate) fn insert_edges(conn: &Connection, groups: &DomainGroups) -> Result<u64> {
    let pairs: Vec<(IpId, &str)> = groups
        .iter()
        .flat_map(|(domain, ids)| ids.iter().map(move |id| (*id, domain.as_str())))
        .collect();
    let mut inserted = 0u64;
    for part in pairs.chunks(EDGE_GROUP) {
        let sql = format!(
            "WITH pending(ip_id, domain) AS (VALUES {}) \
             INSERT INTO ips_domains(ip_id, domain_id) \
             SELECT pending.ip_id, domains.id FROM pending JOIN domains ON domains.domain = pending.domain",
            placeholders(part.len(), "(?,?)")
        );
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(part.len() * 2);
        for (id, domain) in part {
            values.push(id);
            values.push(domain);
        }
        let mut stmt = conn.prepare_cached(&sql)?;
        inserted += stmt.execute(values.as_slice())? as u64;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RECREATE_DOMAIN_TABLES;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(RECREATE_DOMAIN_TABLES).unwrap();
        conn
    }

    #[test]
    fn repeated_pairs_collapse() {
        let mut groups = DomainGroups::new();
        add_pair(&mut groups, "example.com".into(), 1);
        add_pair(&mut groups, "example.com".into(), 1);
        add_pair(&mut groups, "example.com".into(), 2);
        assert_eq!(groups["example.com"], vec![1, 2]);
    }

    #[test]
    fn domains_are_inserted_once_across_calls() {
        let conn = conn();
        let mut groups = DomainGroups::new();
        for (i, d) in ["a.com", "b.com", "c.com"].iter().enumerate() {
            add_pair(&mut groups, d.to_string(), i as IpId + 1);
        }
        assert_eq!(insert_domains(&conn, &groups, 2).unwrap(), 3);
        assert_eq!(insert_domains(&conn, &groups, 2).unwrap(), 0);
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM domains", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn edges_reference_existing_domains() {
        let conn = conn();
        let mut groups = DomainGroups::new();
        add_pair(&mut groups, "a.com".into(), 7);
        add_pair(&mut groups, "a.com".into(), 9);
        add_pair(&mut groups, "b.com".into(), 9);
        insert_domains(&conn, &groups, 10).unwrap();
        assert_eq!(insert_edges(&conn, &groups).unwrap(), 3);

        let rows: Vec<(i64, String)> = conn
            .prepare("SELECT e.ip_id, d.domain FROM ips_domains e JOIN domains d ON d.id = e.domain_id ORDER BY 1, 2")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows, vec![(7, "a.com".to_string()), (9, "a.com".to_string()), (9, "b.com".to_string())]);
    }
}
