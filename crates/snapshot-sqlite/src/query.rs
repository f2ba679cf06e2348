use crate::domain::primary_domain;
use crate::schema::FULL_TEXT_TABLE;
use crate::{Db, IpRecord, RecordCounts};
use anyhow::Result;
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension, Row};

const IP_COLUMNS: &str = "ips.ip, ips.ports, ips.tags, ips.cpes, ips.vulns, ips.hostnames";

/// Columns are declared TEXT but snapshots are not strict about it.
pub(crate) fn text_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    })
}

fn ip_record(row: &Row<'_>) -> rusqlite::Result<IpRecord> {
    Ok(IpRecord {
        ip: text_at(row, 0)?.unwrap_or_default(),
        ports: text_at(row, 1)?,
        tags: text_at(row, 2)?,
        cpes: text_at(row, 3)?,
        vulns: text_at(row, 4)?,
        hostnames: text_at(row, 5)?,
    })
}

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn index_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='index' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    /// Whether the table exists and holds at least one row.
    pub fn table_has_content(&self, name: &str) -> Result<bool> {
        if !self.table_exists(name)? {
            return Ok(false);
        }
        let found: Option<i64> = self
            .conn
            .query_row(&format!("SELECT 1 FROM \"{name}\" LIMIT 1"), [], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count_rows(&self, name: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(&format!("SELECT COUNT(*) FROM \"{name}\""), [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn record_counts(&self) -> Result<RecordCounts> {
        Ok(RecordCounts {
            ips: self.count_rows("ips")?,
            domains: self.count_rows("domains")?,
            edges: self.count_rows("ips_domains")?,
        })
    }

    pub fn lookup_ip(&self, ip: &str, limit: usize) -> Result<Vec<IpRecord>> {
        let mut stmt = self.conn.prepare_cached(&format!("SELECT {IP_COLUMNS} FROM ips WHERE ips.ip = ?1 LIMIT ?2"))?;
        let rows = stmt.query_map(params![ip, limit as i64], ip_record)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Rows whose hostnames reduce to the same primary domain as `domain`.
    pub fn lookup_domain(&self, domain: &str, limit: usize) -> Result<Vec<IpRecord>> {
        let Some(primary) = primary_domain(domain) else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {IP_COLUMNS} FROM domains \
             JOIN ips_domains ON ips_domains.domain_id = domains.id \
             JOIN ips ON ips.id = ips_domains.ip_id \
             WHERE domains.domain = ?1 ORDER BY ips.id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![primary, limit as i64], ip_record)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Full-text search; the input is matched as a single phrase.
    pub fn search_text(&self, text: &str, limit: usize) -> Result<Vec<IpRecord>> {
        let phrase = format!("\"{}\"", text.trim().replace('"', "\"\""));
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {IP_COLUMNS} FROM {FULL_TEXT_TABLE} \
             JOIN ips ON ips.id = {FULL_TEXT_TABLE}.docid \
             WHERE {FULL_TEXT_TABLE} MATCH ?1 ORDER BY ips.id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![phrase, limit as i64], ip_record)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
