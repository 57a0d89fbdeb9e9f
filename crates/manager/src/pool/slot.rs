//! Slot records — per-position state, ports, and session metadata.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PoolSettings;

/// Label keys the agent assigns once it is live.
pub const LABEL_ID: &str = "id";
pub const LABEL_IP: &str = "ip";

/// Resolutions the browser image's X server accepts.
pub const ALLOWED_RESOLUTIONS: &[&str] = &[
    "1280x1024",
    "1920x1080",
    "1366x768",
    "1536x864",
    "1280x720",
    "1440x900",
    "1280x2400",
];

/// A screen geometry, rendered as `WIDTHxHEIGHT` on the wire and in
/// `XVFB_RESOLUTION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn is_allowed(&self) -> bool {
        let rendered = self.to_string();
        ALLOWED_RESOLUTIONS.contains(&rendered.as_str())
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Viewport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once('x')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
        let width = width
            .parse()
            .map_err(|_| format!("bad width in {:?}", s))?;
        let height = height
            .parse()
            .map_err(|_| format!("bad height in {:?}", s))?;
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Viewport {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Viewport> for String {
    fn from(viewport: Viewport) -> Self {
        viewport.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Empty,
    Creating,
    Ready,
    Leased,
    Expiring,
}

/// The three external ports of one slot; fixed at init, never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotPorts {
    pub app: u16,
    pub debugger: u16,
    pub vnc: u16,
}

impl SlotPorts {
    pub fn as_array(&self) -> [u16; 3] {
        [self.app, self.debugger, self.vnc]
    }
}

/// Caller-supplied identity of the session currently holding a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub client_id: Option<String>,
    pub fingerprint_id: Option<String>,
    pub driver: Option<String>,
    pub webhook: Option<String>,
    pub report_key: Option<String>,
    pub session_uuid: Option<String>,
}

impl SessionInfo {
    pub fn is_clear(&self) -> bool {
        *self == SessionInfo::default()
    }
}

/// One pool position. Owns one container at a time; `name`, `index`, and
/// `ports` are fixed for the lifetime of the pool.
#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub name: String,
    pub index: usize,
    pub ports: SlotPorts,
    pub state: SlotState,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub lease_deadline: Option<DateTime<Utc>>,
    pub viewport: Viewport,
    pub labels: HashMap<String, String>,
    pub session: SessionInfo,
    pub vnc_password: Option<String>,
    pub debug: bool,
    /// Set while a release is in flight so concurrent observers skip the
    /// slot.
    pub is_removing: bool,
}

impl Slot {
    pub fn new(settings: &PoolSettings, index: usize) -> Self {
        let name = format!(
            "{}-{}",
            settings.browser_prefix,
            settings.base_browser_port as usize + index
        );
        Self {
            name,
            index,
            ports: SlotPorts {
                app: settings.base_app_port + index as u16,
                debugger: settings.base_browser_port + index as u16,
                vnc: settings.base_vnc_port + index as u16,
            },
            state: SlotState::Empty,
            created_at: None,
            last_used: None,
            lease_deadline: None,
            viewport: settings.resolution,
            labels: HashMap::new(),
            session: SessionInfo::default(),
            vnc_password: None,
            debug: false,
            is_removing: false,
        }
    }

    /// The agent-assigned id, present once `node:setState` arrived.
    pub fn agent_id(&self) -> Option<&str> {
        self.labels.get(LABEL_ID).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PoolSettings {
        PoolSettings {
            browser_prefix: "bx".to_string(),
            num_browsers: 2,
            base_browser_port: 10222,
            base_app_port: 7070,
            base_vnc_port: 15900,
            ..PoolSettings::default()
        }
    }

    #[test]
    fn test_slot_name_and_ports_from_index() {
        let slot = Slot::new(&settings(), 1);
        assert_eq!(slot.name, "bx-10223");
        assert_eq!(slot.index, 1);
        assert_eq!(slot.ports.app, 7071);
        assert_eq!(slot.ports.debugger, 10223);
        assert_eq!(slot.ports.vnc, 15901);
        assert_eq!(slot.state, SlotState::Empty);
        assert!(slot.session.is_clear());
    }

    #[test]
    fn test_ports_disjoint_across_pool() {
        let settings = settings();
        let mut seen = std::collections::HashSet::new();
        for index in 0..settings.num_browsers {
            for port in Slot::new(&settings, index).ports.as_array() {
                assert!(seen.insert(port), "port {} assigned twice", port);
            }
        }
    }

    #[test]
    fn test_viewport_round_trip() {
        let viewport: Viewport = "1366x768".parse().unwrap();
        assert_eq!(
            viewport,
            Viewport {
                width: 1366,
                height: 768
            }
        );
        assert_eq!(viewport.to_string(), "1366x768");
        assert!(viewport.is_allowed());
    }

    #[test]
    fn test_viewport_rejects_garbage() {
        assert!("1366".parse::<Viewport>().is_err());
        assert!("ax768".parse::<Viewport>().is_err());
        assert!("".parse::<Viewport>().is_err());
    }

    #[test]
    fn test_viewport_allowed_set() {
        assert!(Viewport {
            width: 1280,
            height: 720
        }
        .is_allowed());
        assert!(!Viewport {
            width: 800,
            height: 600
        }
        .is_allowed());
    }
}
