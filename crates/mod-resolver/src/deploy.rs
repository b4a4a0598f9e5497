//! Deployment records as read from the deploy store
//!
//! Only the fields this crate works with are typed; everything else in the
//! record is kept as pass-through JSON.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use url::{Host, Url};

use crate::core::{ResolveError, Result};

/// Docker endpoint of a world running on the dashboard host itself
pub const LOCAL_DOCKER_SOCKET: &str = "unix:///var/run/docker.sock";

type Extra = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Running,
    Pending,
    #[default]
    Stop,
}

/// One deployment of a game-server cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deploy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub status: DeployStatus,
    pub cluster: Cluster,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub ini: ClusterIni,
    #[serde(default)]
    pub world: Vec<World>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterIni {
    #[serde(default)]
    pub master_ip: String,
    #[serde(default = "default_master_port")]
    pub master_port: u16,
    #[serde(default)]
    pub cluster_password: String,
    #[serde(flatten)]
    pub extra: Extra,
}

fn default_master_port() -> u16 {
    10888
}

/// One shard of the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    /// `Master` or `Caves`
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub docker_api: String,
    /// Mod override blob of this shard
    #[serde(default)]
    pub modoverrides: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl World {
    pub fn is_master(&self) -> bool {
        self.kind == "Master"
    }

    pub fn runs_remotely(&self) -> bool {
        !self.docker_api.is_empty() && self.docker_api != LOCAL_DOCKER_SOCKET
    }
}

impl Deploy {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Read a deployment record from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ResolveError::FileSystem {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&raw).map_err(|e| ResolveError::InvalidDeploy {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Override blob the mod list is resolved from: the first world's
    pub fn override_blob(&self) -> &str {
        self.cluster
            .world
            .first()
            .map(|world| world.modoverrides.as_str())
            .unwrap_or_default()
    }

    /// Address players should connect to
    ///
    /// Starts from `fallback_host` (the host serving the dashboard), prefers a
    /// public `master_ip`, and prefers the address of a remote master shard
    /// over both.
    pub fn connect_host(&self, fallback_host: &str) -> String {
        let mut host = fallback_host.to_string();
        if is_public_ip(&self.cluster.ini.master_ip) {
            host = self.cluster.ini.master_ip.clone();
        }

        let remote_master = self
            .cluster
            .world
            .iter()
            .filter(|world| world.is_master() && world.runs_remotely())
            .find_map(|world| extract_first_valid_ip(&world.docker_api));
        if let Some(ip) = remote_master {
            host = ip.to_string();
        }

        host
    }
}

/// Console command joining the cluster, e.g. `c_connect("1.2.3.4", 10999, "secret")`
pub fn connect_command(deploy: &Deploy, fallback_host: &str) -> String {
    format!(
        "c_connect(\"{}\", {}, \"{}\")",
        deploy.connect_host(fallback_host),
        deploy.cluster.ini.master_port,
        deploy.cluster.ini.cluster_password
    )
}

/// Whether `raw` is an IP address routable on the public internet
pub fn is_public_ip(raw: &str) -> bool {
    match raw.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_public_v4(ip),
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            !(ip.is_loopback()
                || ip.is_unspecified()
                || ip.is_multicast()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80) // link local
        }
        Err(_) => false,
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let shared = a == 100 && (64..128).contains(&b); // carrier-grade NAT
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        || shared)
}

/// First IPv4 address found in `text`, e.g. the host of `tcp://10.0.0.5:2375`
pub fn extract_first_valid_ip(text: &str) -> Option<Ipv4Addr> {
    if let Ok(url) = Url::parse(text) {
        if let Some(Host::Ipv4(ip)) = url.host() {
            return Some(ip);
        }
    }

    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .find_map(|token| token.parse::<Ipv4Addr>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn deploy(master_ip: &str, worlds: serde_json::Value) -> Deploy {
        serde_json::from_value(json!({
            "id": 7,
            "status": "running",
            "cluster": {
                "ini": {
                    "master_ip": master_ip,
                    "master_port": 10999,
                    "cluster_password": "secret",
                    "cluster_name": "weekend"
                },
                "world": worlds
            },
            "updated_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_override_blob_from_first_world() {
        let d = deploy(
            "127.0.0.1",
            json!([
                {
                    "type": "Master",
                    "docker_api": LOCAL_DOCKER_SOCKET,
                    "modoverrides": "return { [\"workshop-1\"]={} }"
                },
                {
                    "type": "Caves",
                    "docker_api": LOCAL_DOCKER_SOCKET,
                    "modoverrides": "return { [\"workshop-2\"]={} }"
                }
            ]),
        );
        assert_eq!(d.override_blob(), "return { [\"workshop-1\"]={} }");
        assert_eq!(d.status, DeployStatus::Running);
        assert_eq!(d.extra.get("updated_at"), Some(&json!("2024-03-01T10:00:00Z")));

        let empty = deploy("127.0.0.1", json!([]));
        assert_eq!(empty.override_blob(), "");
    }

    #[test]
    fn test_connect_uses_fallback_for_private_master_ip() {
        let d = deploy(
            "192.168.1.20",
            json!([{"type": "Master", "docker_api": LOCAL_DOCKER_SOCKET}]),
        );
        assert_eq!(
            connect_command(&d, "dashboard.example"),
            r#"c_connect("dashboard.example", 10999, "secret")"#
        );
    }

    #[test]
    fn test_connect_prefers_public_master_ip() {
        let d = deploy("8.8.4.4", json!([{"type": "Master", "docker_api": LOCAL_DOCKER_SOCKET}]));
        assert_eq!(d.connect_host("dashboard.example"), "8.8.4.4");
    }

    #[test]
    fn test_connect_prefers_remote_master_shard() {
        let d = deploy(
            "8.8.4.4",
            json!([
                {"type": "Caves", "docker_api": "tcp://10.0.0.9:2375"},
                {"type": "Master", "docker_api": "tcp://10.0.0.5:2375"}
            ]),
        );
        assert_eq!(d.connect_host("dashboard.example"), "10.0.0.5");
    }

    #[test]
    fn test_is_public_ip() {
        assert!(is_public_ip("8.8.8.8"));
        assert!(is_public_ip("2001:4860:4860::8888"));
        assert!(!is_public_ip("10.1.2.3"));
        assert!(!is_public_ip("172.16.0.1"));
        assert!(!is_public_ip("100.64.0.1"));
        assert!(!is_public_ip("127.0.0.1"));
        assert!(!is_public_ip("fd00::1"));
        assert!(!is_public_ip(""));
        assert!(!is_public_ip("not-an-ip"));
    }

    #[test]
    fn test_extract_first_valid_ip() {
        assert_eq!(
            extract_first_valid_ip("tcp://192.168.0.4:2375"),
            Some(Ipv4Addr::new(192, 168, 0, 4))
        );
        assert_eq!(
            extract_first_valid_ip("ssh host 300.1.1.1 then 10.0.0.7"),
            Some(Ipv4Addr::new(10, 0, 0, 7))
        );
        assert_eq!(extract_first_valid_ip("tcp://docker.internal:2375"), None);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let record = json!({
            "cluster": {
                "ini": {"master_ip": "127.0.0.1", "cluster_password": ""},
                "world": [{"type": "Master", "modoverrides": "workshop-100"}]
            }
        });
        write!(file, "{}", record).unwrap();

        let d = Deploy::load(file.path()).await.unwrap();
        assert_eq!(d.cluster.ini.master_port, 10888);
        assert_eq!(d.status, DeployStatus::Stop);
        assert_eq!(d.override_blob(), "workshop-100");
    }

    #[tokio::test]
    async fn test_load_errors() {
        let missing = Deploy::load(Path::new("/nonexistent/deploy.json")).await.unwrap_err();
        assert_eq!(missing.category(), "file_system");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"cluster\": 5}}").unwrap();
        let invalid = Deploy::load(file.path()).await.unwrap_err();
        assert_eq!(invalid.category(), "invalid_deploy");
    }
}
