//! Registry of the test servers this service knows how to start.
//!
//! The set of server kinds is closed: [`ServerKind`] enumerates every
//! supported protocol and each kind carries its own in-container content root.
//! A [`ServerCatalog`] maps kinds to concrete [`ServerDefinition`]s and is
//! constructed explicitly and handed to the orchestrator, so tests can swap in
//! their own definitions.
//!
//! ## Tag casing
//!
//! Type tags are upper-case (`"WEB"`, `"MQTT"`, ...) everywhere: in the
//! catalog, in persisted records and in `POST /servers/{type}`. Lookups are
//! exact and case-sensitive. URL protocol segments (`/protocols/web/...`) are
//! lower-case and go through [`ServerKind::from_protocol`] instead.

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Supported test-server protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServerKind {
    Web,
    Ftp,
    Smb,
    Mail,
    Mqtt,
    Otel,
}

impl ServerKind {
    pub const ALL: [ServerKind; 6] = [
        ServerKind::Mqtt,
        ServerKind::Web,
        ServerKind::Ftp,
        ServerKind::Smb,
        ServerKind::Mail,
        ServerKind::Otel,
    ];

    /// Upper-case type tag used by the catalog and persisted records.
    pub fn tag(self) -> &'static str {
        match self {
            ServerKind::Web => "WEB",
            ServerKind::Ftp => "FTP",
            ServerKind::Smb => "SMB",
            ServerKind::Mail => "MAIL",
            ServerKind::Mqtt => "MQTT",
            ServerKind::Otel => "OTEL",
        }
    }

    /// Lower-case short name used in container names and URL segments.
    pub fn short_name(self) -> &'static str {
        match self {
            ServerKind::Web => "web",
            ServerKind::Ftp => "ftp",
            ServerKind::Smb => "smb",
            ServerKind::Mail => "mail",
            ServerKind::Mqtt => "mqtt",
            ServerKind::Otel => "otel",
        }
    }

    /// Exact, case-sensitive tag lookup.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Lookup by lower-case URL segment.
    pub fn from_protocol(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.short_name() == segment)
    }

    /// Root directory exposed for listing and uploads, if the protocol has one.
    pub fn content_root(self) -> Option<&'static str> {
        match self {
            ServerKind::Web => Some("/usr/share/nginx/html"),
            ServerKind::Ftp => Some("/home/user"),
            ServerKind::Smb => Some("/shares"),
            ServerKind::Mail | ServerKind::Mqtt | ServerKind::Otel => None,
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Image, ports and environment for one kind of test server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    #[serde(rename = "type")]
    pub kind: ServerKind,
    pub image: String,
    pub name: String,
    pub ports: BTreeSet<u16>,
    pub env: BTreeMap<String, String>,
}

impl ServerDefinition {
    /// Built-in definition for a kind.
    pub fn builtin(kind: ServerKind) -> Self {
        let (image, ports, env): (&str, &[u16], &[(&str, &str)]) = match kind {
            ServerKind::Mqtt => (
                "simple-test-server-custom-mqtt:latest",
                &[1883, 9001],
                &[("MQTT_USERNAME", "user"), ("MQTT_PASSWORD", "password")],
            ),
            ServerKind::Web => ("simple-test-server-custom-nginx:latest", &[80], &[]),
            ServerKind::Ftp => (
                "garethflowers/ftp-server:latest",
                &[20, 21],
                &[("FTP_USER", "user"), ("FTP_PASS", "password")],
            ),
            ServerKind::Smb => ("ghcr.io/servercontainers/samba:smbd-only-latest", &[139, 445], &[]),
            ServerKind::Mail => ("mailhog/mailhog:latest", &[1025, 8025], &[]),
            ServerKind::Otel => (
                "simple-test-server-custom-otel:latest",
                &[4317, 4318, 8888, 8889],
                &[],
            ),
        };

        Self {
            kind,
            image: image.to_string(),
            name: kind.short_name().to_string(),
            ports: ports.iter().copied().collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Explicitly constructed registry of server definitions.
#[derive(Debug, Clone)]
pub struct ServerCatalog {
    definitions: Vec<ServerDefinition>,
}

impl ServerCatalog {
    /// Catalog with every built-in server kind.
    pub fn builtin() -> Self {
        Self {
            definitions: ServerKind::ALL
                .into_iter()
                .map(ServerDefinition::builtin)
                .collect(),
        }
    }

    /// Catalog with caller-provided definitions, in the given order.
    pub fn with_definitions(definitions: Vec<ServerDefinition>) -> Self {
        Self { definitions }
    }

    /// Resolve an upper-case type tag.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] for unknown tags or kinds missing
    /// from this catalog.
    pub fn resolve(&self, tag: &str) -> Result<&ServerDefinition> {
        let kind = ServerKind::from_tag(tag)
            .ok_or_else(|| ServerError::NotFound(format!("server type {}", tag)))?;
        self.definitions
            .iter()
            .find(|definition| definition.kind == kind)
            .ok_or_else(|| ServerError::NotFound(format!("server type {}", tag)))
    }

    /// Every definition, in catalog order.
    pub fn list_all(&self) -> &[ServerDefinition] {
        &self.definitions
    }
}

impl Default for ServerCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn resolves_every_builtin_tag() {
        let catalog = ServerCatalog::builtin();
        for kind in ServerKind::ALL {
            let definition = catalog.resolve(kind.tag()).unwrap();
            assert_eq!(definition.kind, kind);
            assert_eq!(definition.name, kind.short_name());
        }
        assert_eq!(catalog.list_all().len(), 6);
    }

    #[test]
    fn tag_lookup_is_case_sensitive() {
        let catalog = ServerCatalog::builtin();
        assert!(catalog.resolve("MAIL").is_ok());

        let err = catalog.resolve("mail").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(catalog.resolve("GOPHER").is_err());
    }

    #[test]
    fn mail_definition_matches_defaults() {
        let mail = ServerDefinition::builtin(ServerKind::Mail);
        assert_eq!(mail.image, "mailhog/mailhog:latest");
        assert_eq!(mail.ports, BTreeSet::from([1025, 8025]));
        assert!(mail.env.is_empty());
    }

    #[test]
    fn substituted_catalog_only_knows_its_definitions() {
        let mut web = ServerDefinition::builtin(ServerKind::Web);
        web.image = "nginx:alpine".to_string();
        let catalog = ServerCatalog::with_definitions(vec![web]);

        assert_eq!(catalog.resolve("WEB").unwrap().image, "nginx:alpine");
        assert!(catalog.resolve("FTP").is_err());
    }

    #[test]
    fn protocol_segments_are_lower_case() {
        assert_eq!(ServerKind::from_protocol("smb"), Some(ServerKind::Smb));
        assert_eq!(ServerKind::from_protocol("SMB"), None);
        assert_eq!(ServerKind::Ftp.content_root(), Some("/home/user"));
        assert_eq!(ServerKind::Mqtt.content_root(), None);
    }

    #[test]
    fn definitions_serialize_with_upper_case_type() {
        let json = serde_json::to_value(ServerDefinition::builtin(ServerKind::Otel)).unwrap();
        assert_eq!(json["type"], "OTEL");
        assert_eq!(json["ports"], serde_json::json!([4317, 4318, 8888, 8889]));
    }
}
