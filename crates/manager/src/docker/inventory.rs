//! Inventory — `ps` row and `inspect` JSON parsing, ports-column decoding.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use super::cli::{stderr_of, DockerCli, DockerError};

/// Separator used in the `ps` format string so the four columns survive
/// values that contain spaces (status text, port lists).
const PS_FORMAT: &str = "{{.Names}}\t{{.Image}}\t{{.State}}\t{{.Ports}}";

/// One parsed row of `ps` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsRow {
    pub name: String,
    pub image: String,
    pub state: String,
    pub ports_column: String,
}

/// External port bindings recovered from a `ps` ports column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedPorts {
    pub app: Option<u16>,
    pub debugger: Option<u16>,
    pub vnc: Option<u16>,
}

// Internal ports recognized in the `ps` ports column. `run` binds
// 8080/19222/15900, which are authoritative.
// TODO: reconcile these legacy internals with run's constants once the
// adopted images' exposed ports are confirmed.
const PS_INTERNAL_VNC: u16 = 5900;
const PS_INTERNAL_APP: u16 = 3000;
const PS_INTERNAL_DEBUGGER: u16 = 4444;

/// Decode a `ps` ports column such as
/// `0.0.0.0:15900->5900/tcp, 0.0.0.0:7070->3000/tcp`. Entries that are not
/// wildcard-bound TCP mappings to a known internal port are ignored.
pub fn parse_ports_line(line: &str) -> ParsedPorts {
    let mut ports = ParsedPorts::default();
    for entry in line.split(',').map(str::trim) {
        let Some(rest) = entry.strip_prefix("0.0.0.0:") else {
            continue;
        };
        let Some((external, internal)) = rest.split_once("->") else {
            continue;
        };
        let Some(internal) = internal.strip_suffix("/tcp") else {
            continue;
        };
        let (Ok(external), Ok(internal)) = (external.parse::<u16>(), internal.parse::<u16>())
        else {
            continue;
        };
        match internal {
            PS_INTERNAL_VNC => ports.vnc = Some(external),
            PS_INTERNAL_APP => ports.app = Some(external),
            PS_INTERNAL_DEBUGGER => ports.debugger = Some(external),
            _ => {}
        }
    }
    ports
}

/// Split one formatted `ps` line into its four columns. Rows that do not
/// carry all four fields are diagnosed by the caller's log and dropped.
pub fn parse_ps_line(line: &str) -> Option<PsRow> {
    let mut fields = line.splitn(4, '\t');
    let name = fields.next()?.trim();
    let image = fields.next()?.trim();
    let state = fields.next()?.trim();
    let ports_column = fields.next()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(PsRow {
        name: name.to_string(),
        image: image.to_string(),
        state: state.to_string(),
        ports_column: ports_column.to_string(),
    })
}

/// Metadata recovered from `inspect`.
#[derive(Debug, Clone, Default)]
pub struct ContainerDetails {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub running: bool,
    pub labels: HashMap<String, String>,
    /// `container port -> host port` bindings.
    pub host_ports: HashMap<u16, u16>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    created: Option<String>,
    state: Option<InspectState>,
    config: Option<InspectConfig>,
    network_settings: Option<InspectNetwork>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    labels: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    ports: Option<HashMap<String, Option<Vec<InspectPortBinding>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectPortBinding {
    host_port: Option<String>,
}

fn details_from_entry(name: &str, entry: InspectEntry) -> ContainerDetails {
    let created_at = entry
        .created
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let mut host_ports = HashMap::new();
    if let Some(port_map) = entry.network_settings.and_then(|ns| ns.ports) {
        for (container_port, bindings) in port_map {
            // Keys look like "8080/tcp".
            let Some(container_port) = container_port
                .split_once('/')
                .and_then(|(port, _)| port.parse::<u16>().ok())
            else {
                continue;
            };
            let Some(host_port) = bindings
                .unwrap_or_default()
                .into_iter()
                .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()))
            else {
                continue;
            };
            host_ports.insert(container_port, host_port);
        }
    }

    ContainerDetails {
        name: name.to_string(),
        created_at,
        running: entry
            .state
            .and_then(|s| s.running)
            .unwrap_or_default(),
        labels: entry
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default(),
        host_ports,
    }
}

impl DockerCli {
    /// Names of containers whose name starts with `prefix`.
    pub async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, DockerError> {
        let output = self.output(["ps", "--format", "{{.Names}}"]).await?;
        if !output.status.success() {
            return Err(DockerError::Malformed(stderr_of(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && name.starts_with(prefix))
            .map(String::from)
            .collect())
    }

    /// Formatted `ps` rows. Rows missing any of the four columns are logged
    /// and skipped rather than failing the whole listing.
    pub async fn ps_rows(&self) -> Result<Vec<PsRow>, DockerError> {
        let output = self.output(["ps", "--format", PS_FORMAT]).await?;
        if !output.status.success() {
            return Err(DockerError::Malformed(stderr_of(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut rows = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            match parse_ps_line(line) {
                Some(row) => rows.push(row),
                None => warn!("skipping unparsable ps row: {}", line),
            }
        }
        Ok(rows)
    }

    /// Parsed `inspect` metadata for one container.
    pub async fn inspect(&self, name: &str) -> Result<ContainerDetails, DockerError> {
        let output = self.output(["inspect", name]).await?;
        if !output.status.success() {
            return Err(DockerError::InspectFailed {
                name: name.to_string(),
                detail: stderr_of(&output),
            });
        }
        let entries: Vec<InspectEntry> = serde_json::from_slice(&output.stdout)
            .map_err(|e| DockerError::Malformed(format!("inspect {}: {}", name, e)))?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| DockerError::Malformed(format!("inspect {}: empty result", name)))?;
        Ok(details_from_entry(name, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_ports_line ────────────────────────────────────────

    #[test]
    fn test_parse_ports_line_full() {
        let ports = parse_ports_line(
            "0.0.0.0:15900->5900/tcp, 0.0.0.0:7070->3000/tcp, 0.0.0.0:10222->4444/tcp",
        );
        assert_eq!(
            ports,
            ParsedPorts {
                app: Some(7070),
                debugger: Some(10222),
                vnc: Some(15900),
            }
        );
    }

    #[test]
    fn test_parse_ports_line_partial() {
        let ports = parse_ports_line("0.0.0.0:15901->5900/tcp");
        assert_eq!(ports.vnc, Some(15901));
        assert_eq!(ports.app, None);
        assert_eq!(ports.debugger, None);
    }

    #[test]
    fn test_parse_ports_line_ignores_unknown_internal() {
        let ports = parse_ports_line("0.0.0.0:8081->9090/tcp");
        assert_eq!(ports, ParsedPorts::default());
    }

    #[test]
    fn test_parse_ports_line_ignores_specific_bind_address() {
        let ports = parse_ports_line("127.0.0.1:15900->5900/tcp");
        assert_eq!(ports, ParsedPorts::default());
    }

    #[test]
    fn test_parse_ports_line_ignores_udp_and_garbage() {
        assert_eq!(parse_ports_line("0.0.0.0:5900->5900/udp"), ParsedPorts::default());
        assert_eq!(parse_ports_line("not ports at all"), ParsedPorts::default());
        assert_eq!(parse_ports_line(""), ParsedPorts::default());
    }

    // ── parse_ps_line ───────────────────────────────────────────

    #[test]
    fn test_parse_ps_line_four_fields() {
        let row =
            parse_ps_line("bx-10222\tbrowser-node:latest\trunning\t0.0.0.0:7070->3000/tcp")
                .unwrap();
        assert_eq!(row.name, "bx-10222");
        assert_eq!(row.image, "browser-node:latest");
        assert_eq!(row.state, "running");
        assert_eq!(row.ports_column, "0.0.0.0:7070->3000/tcp");
    }

    #[test]
    fn test_parse_ps_line_empty_ports_column() {
        let row = parse_ps_line("bx-10222\timg\trunning\t").unwrap();
        assert_eq!(row.ports_column, "");
    }

    #[test]
    fn test_parse_ps_line_missing_fields_rejected() {
        assert!(parse_ps_line("bx-10222\timg\trunning").is_none());
        assert!(parse_ps_line("bx-10222").is_none());
        assert!(parse_ps_line("").is_none());
    }

    // ── inspect parsing ─────────────────────────────────────────

    #[test]
    fn test_details_from_inspect_json() {
        let raw = r#"[{
            "Created": "2024-03-01T10:30:00.000000000Z",
            "State": { "Running": true },
            "Config": { "Labels": { "id": "A1", "ip": "10.0.0.1" } },
            "NetworkSettings": {
                "Ports": {
                    "8080/tcp": [{ "HostIp": "0.0.0.0", "HostPort": "7070" }],
                    "19222/tcp": [{ "HostIp": "0.0.0.0", "HostPort": "10222" }],
                    "15900/tcp": null
                }
            }
        }]"#;
        let entries: Vec<InspectEntry> = serde_json::from_str(raw).unwrap();
        let details = details_from_entry("bx-10222", entries.into_iter().next().unwrap());

        assert!(details.running);
        assert_eq!(details.labels.get("id").map(String::as_str), Some("A1"));
        assert_eq!(details.host_ports.get(&8080), Some(&7070));
        assert_eq!(details.host_ports.get(&19222), Some(&10222));
        assert!(!details.host_ports.contains_key(&15900));
        let created = details.created_at.unwrap();
        assert_eq!(created.timestamp(), 1709289000);
    }

    #[test]
    fn test_details_from_sparse_inspect_json() {
        let entries: Vec<InspectEntry> = serde_json::from_str("[{}]").unwrap();
        let details = details_from_entry("bx-1", entries.into_iter().next().unwrap());
        assert!(!details.running);
        assert!(details.labels.is_empty());
        assert!(details.created_at.is_none());
    }
}
