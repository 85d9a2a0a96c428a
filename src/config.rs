//! Family and deployment configuration.
//!
//! A lone family lives in a base directory holding `etc/family` (the family
//! id), `etc/laf-server.yml` (served lones), `etc/cm-config.yml`
//! (change-management policy), per-lone `schemas/<lone>.options.yml` CLI
//! schemas, and `apischemas/openapi/` with the versioned OpenAPI documents.
//! Deployment-specific settings merge in from
//! `$LAF_CONFIG/config-<family>#<deployment>.json`.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const FAMILY_FILE: &str = "etc/family";
pub const SERVER_CONFIG_FILE: &str = "etc/laf-server.yml";
pub const CM_CONFIG_FILE: &str = "etc/cm-config.yml";
pub const OPENAPI_DIR: &str = "apischemas/openapi";

/// Execution regime of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// CLI driving a remote gateway.
    Client,
    /// Hosted behind the gateway/broker/worker fabric.
    Server,
    /// CLI running the handler in-process.
    Lone,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Mode::Client),
            "server" => Ok(Mode::Server),
            "lone" => Ok(Mode::Lone),
            other => anyhow::bail!("unknown mode '{other}'"),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Client => write!(f, "client"),
            Mode::Server => write!(f, "server"),
            Mode::Lone => write!(f, "lone"),
        }
    }
}

/// Options influencing config resolution, gathered from CLI framework flags
/// or server process arguments.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    pub deployment: Option<String>,
    pub mode: Option<Mode>,
    pub servers: Option<HashMap<String, Vec<String>>>,
}

/// Loaded family configuration; immutable after startup.
#[derive(Debug, Clone)]
pub struct FamilyConfig {
    pub family: String,
    pub deployment: String,
    pub mode: Mode,
    pub basedir: PathBuf,
    pub servers: Option<HashMap<String, Vec<String>>>,
    /// Deployment settings merged from the `LAF_CONFIG` JSON
    /// (`url_prefix`, `notification`, journal endpoints, ...).
    pub extra: Map<String, Value>,
}

impl FamilyConfig {
    pub fn openapi_dir(&self) -> PathBuf {
        self.basedir.join(OPENAPI_DIR)
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn url_prefix(&self) -> Option<&str> {
        self.extra_str("url_prefix")
    }

    pub fn notification(&self) -> Option<&str> {
        self.extra_str("notification")
    }

    pub fn primary_journal(&self) -> Option<&str> {
        self.extra_str("primary_journal")
    }

    pub fn secondary_journal(&self) -> Option<&str> {
        self.extra_str("secondary_journal")
    }

    pub fn remoteid(&self) -> Option<&str> {
        self.extra_str("remoteid")
    }

    /// `family/deployment`, the journal's `lonefam` field.
    pub fn lonefam(&self) -> String {
        format!("{}/{}", self.family, self.deployment)
    }
}

/// Read the family id from `etc/family`.
pub fn get_family(basedir: &Path) -> anyhow::Result<String> {
    let path = basedir.join(FAMILY_FILE);
    let family = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Family file etc/family is missing from config: {e}"))?
        .trim_end()
        .to_string();
    if family.is_empty() {
        anyhow::bail!("Family file etc/family is empty");
    }
    Ok(family)
}

/// Resolve the full family configuration for one invocation.
///
/// Deployment defaults to `prod`, mode to `client`. When `LAF_CONFIG` is
/// set, `config-<family>#<deployment>.json` must exist there; a missing
/// file means the deployment is invalid for this family.
pub fn load_family_config(basedir: &Path, options: &ConfigOptions) -> anyhow::Result<FamilyConfig> {
    let family = get_family(basedir)?;
    let deployment = options
        .deployment
        .clone()
        .unwrap_or_else(|| "prod".to_string());
    let mode = options.mode.unwrap_or(Mode::Client);

    let mut extra = Map::new();
    if let Ok(config_dir) = std::env::var("LAF_CONFIG") {
        let flat_family = family.replace('/', "#");
        let cfg_name = format!("config-{flat_family}#{deployment}.json");
        let cfg_path = Path::new(&config_dir).join(cfg_name);
        let content = std::fs::read_to_string(&cfg_path)
            .map_err(|_| anyhow::anyhow!("Invalid deployment for the family"))?;
        let parsed: Value = serde_json::from_str(&content)?;
        if let Value::Object(map) = parsed {
            extra = map;
        }
    }

    Ok(FamilyConfig {
        family,
        deployment,
        mode,
        basedir: basedir.to_path_buf(),
        servers: options.servers.clone(),
        extra,
    })
}

/// `etc/laf-server.yml`: the lones this deployment serves.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub lones: Vec<String>,
}

impl ServerConfig {
    pub fn load(basedir: &Path) -> anyhow::Result<ServerConfig> {
        let path = basedir.join(SERVER_CONFIG_FILE);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// `etc/cm-config.yml`: `(lone, operationId)` pairs that require a
/// change-management ticket.
#[derive(Debug, Clone, Default)]
pub struct CmConfig {
    entries: HashMap<String, HashMap<String, Value>>,
}

impl CmConfig {
    /// Missing file means no policy; an unreadable file is an error the
    /// caller surfaces as a 400.
    pub fn load(basedir: &Path) -> anyhow::Result<CmConfig> {
        let path = basedir.join(CM_CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CmConfig::default());
            }
            Err(e) => anyhow::bail!("cannot read {}: {e}", path.display()),
        };
        let entries: HashMap<String, HashMap<String, Value>> = serde_yaml::from_str(&content)
            .map_err(|_| anyhow::anyhow!("Error loading cm-config.yml file"))?;
        Ok(CmConfig { entries })
    }

    pub fn requires_ticket(&self, lone: &str, operation_id: &str) -> bool {
        self.entries
            .get(lone)
            .map(|ops| ops.contains_key(operation_id))
            .unwrap_or(false)
    }
}

/// Per-lone CLI configuration from `schemas/<lone>.options.yml`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LoneOptions {
    /// Per-verb default input objects.
    #[serde(default)]
    pub default_input: HashMap<String, Value>,
    /// Per-verb getopt schemas: `{verb: {flag: "string"|"list"|"boolean"}}`,
    /// with a `default` section merged under every verb.
    #[serde(default)]
    pub getopt: HashMap<String, HashMap<String, String>>,
}

impl LoneOptions {
    pub fn load(basedir: &Path, lone: &str) -> anyhow::Result<LoneOptions> {
        let path = basedir.join("schemas").join(format!("{lone}.options.yml"));
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LoneOptions::default());
            }
            Err(e) => anyhow::bail!("cannot read {}: {e}", path.display()),
        };
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Flag schema for one verb: the `default` section deep-merged with the
    /// verb's own section, verb entries winning.
    pub fn getopt_schema(&self, verb: &str) -> HashMap<String, String> {
        let mut schema = self.getopt.get("default").cloned().unwrap_or_default();
        if let Some(verb_schema) = self.getopt.get(verb) {
            for (k, v) in verb_schema {
                schema.insert(k.clone(), v.clone());
            }
        }
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn family_dir(lones_yaml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join(FAMILY_FILE), "acme/infra\n").unwrap();
        let mut f = std::fs::File::create(dir.path().join(SERVER_CONFIG_FILE)).unwrap();
        f.write_all(lones_yaml.as_bytes()).unwrap();
        dir
    }

    #[test]
    fn test_family_and_server_config() {
        let dir = family_dir("lones:\n  - foo\n  - bar\n");
        assert_eq!(get_family(dir.path()).unwrap(), "acme/infra");
        let server = ServerConfig::load(dir.path()).unwrap();
        assert_eq!(server.lones, vec!["foo", "bar"]);
    }

    #[test]
    fn test_defaults() {
        let dir = family_dir("lones: []\n");
        std::env::remove_var("LAF_CONFIG");
        let cfg = load_family_config(dir.path(), &ConfigOptions::default()).unwrap();
        assert_eq!(cfg.deployment, "prod");
        assert_eq!(cfg.mode, Mode::Client);
        assert_eq!(cfg.lonefam(), "acme/infra/prod");
    }

    #[test]
    fn test_cm_config() {
        let dir = family_dir("lones: []\n");
        std::fs::write(
            dir.path().join(CM_CONFIG_FILE),
            "foo:\n  create_foo: {}\n",
        )
        .unwrap();
        let cm = CmConfig::load(dir.path()).unwrap();
        assert!(cm.requires_ticket("foo", "create_foo"));
        assert!(!cm.requires_ticket("foo", "get_foo"));
        assert!(!cm.requires_ticket("bar", "create_foo"));
    }

    #[test]
    fn test_cm_config_missing_is_empty() {
        let dir = family_dir("lones: []\n");
        let cm = CmConfig::load(dir.path()).unwrap();
        assert!(!cm.requires_ticket("foo", "anything"));
    }

    #[test]
    fn test_lone_options_schema_merging() {
        let dir = family_dir("lones: []\n");
        std::fs::create_dir_all(dir.path().join("schemas")).unwrap();
        std::fs::write(
            dir.path().join("schemas/foo.options.yml"),
            concat!(
                "default_input:\n  create:\n    size: small\n",
                "getopt:\n  default:\n    verbose: boolean\n",
                "  create:\n    name: string\n    tags: list\n",
            ),
        )
        .unwrap();
        let opts = LoneOptions::load(dir.path(), "foo").unwrap();
        let schema = opts.getopt_schema("create");
        assert_eq!(schema.get("verbose").unwrap(), "boolean");
        assert_eq!(schema.get("name").unwrap(), "string");
        assert_eq!(schema.get("tags").unwrap(), "list");
        let get_schema = opts.getopt_schema("get");
        assert!(get_schema.contains_key("verbose"));
        assert!(!get_schema.contains_key("name"));
    }

    #[test]
    fn test_lone_options_missing_is_default() {
        let dir = family_dir("lones: []\n");
        let opts = LoneOptions::load(dir.path(), "nope").unwrap();
        assert!(opts.getopt.is_empty());
        assert!(opts.default_input.is_empty());
    }
}
