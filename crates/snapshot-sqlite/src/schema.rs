/// Per-IP table as shipped in the upstream snapshot.
pub const FLAT_TABLE: &str = "data";

pub const NORMALIZED_TABLES: [&str; 3] = ["ips", "domains", "ips_domains"];

pub const CREATE_IPS: &str = r#"
CREATE TABLE ips (
  id              INTEGER PRIMARY KEY,
  ip              TEXT NOT NULL,
  ports           TEXT,
  tags            TEXT,
  cpes            TEXT,
  vulns           TEXT,
  hostnames       TEXT
);
"#;

/// Fresh identities are assigned in flat-table order, so `ips.id` is dense.
pub const COPY_FLAT_INTO_IPS: &str = r#"
INSERT INTO ips (ip, ports, tags, cpes, vulns, hostnames)
SELECT ip, ports, tags, cpes, vulns, hostnames FROM data ORDER BY rowid;
"#;

pub const RECREATE_DOMAIN_TABLES: &str = r#"
DROP TABLE IF EXISTS ips_domains;
DROP TABLE IF EXISTS domains;

CREATE TABLE domains (
  id              INTEGER PRIMARY KEY,
  domain          TEXT NOT NULL UNIQUE
);

CREATE TABLE ips_domains (
  ip_id           INTEGER NOT NULL,
  domain_id       INTEGER NOT NULL
);
"#;

/// Built once every chunk is inserted; `domains.domain` is covered by its
/// UNIQUE constraint.
pub const FINAL_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS ips_ip_idx ON ips(ip);
CREATE UNIQUE INDEX IF NOT EXISTS ips_domains_pair_idx ON ips_domains(ip_id, domain_id);
CREATE INDEX IF NOT EXISTS ips_domains_domain_idx ON ips_domains(domain_id);
"#;

pub const UNIQUE_IP_INDEX: &str = "ips_ip_unique_idx";
pub const FULL_TEXT_TABLE: &str = "ips_fts";

pub const DROP_SEARCH_STRUCTURES: &str = r#"
DROP INDEX IF EXISTS ips_ip_unique_idx;
DROP TABLE IF EXISTS ips_fts;
"#;

pub const CREATE_UNIQUE_IP_INDEX: &str = "CREATE UNIQUE INDEX ips_ip_unique_idx ON ips(ip);";

pub const CREATE_FULL_TEXT: &str = r#"
CREATE VIRTUAL TABLE ips_fts USING fts4(ip, ports, tags, cpes, vulns, hostnames);
INSERT INTO ips_fts (docid, ip, ports, tags, cpes, vulns, hostnames)
SELECT id, ip, ports, tags, cpes, vulns, hostnames FROM ips;
"#;
