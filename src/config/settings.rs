use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_NODE_ADDR: &str = "127.0.0.1:2001";
static DEFAULT_NETWORK_ID: &str = "devnet";
static DEFAULT_DATA_DIR: &str = "data";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const MINING_ADDRESS_KEY: &str = "MINING_ADDRESS";
const NODE_ID_KEY: &str = "NODE_ID";
const NETWORK_ID_KEY: &str = "NETWORK_ID";
const DATA_DIR_KEY: &str = "DATA_DIR";
const BOOTSTRAP_PEERS_KEY: &str = "BOOTSTRAP_PEERS";

/// Environment-backed node configuration.
///
/// The core never parses config files; the process wrapper provides the
/// data directory, network id, listen address, and bootstrap peers
/// through the environment.
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();

        map.insert(
            String::from(NODE_ADDRESS_KEY),
            env::var(NODE_ADDRESS_KEY).unwrap_or_else(|_| String::from(DEFAULT_NODE_ADDR)),
        );
        map.insert(
            String::from(NETWORK_ID_KEY),
            env::var(NETWORK_ID_KEY).unwrap_or_else(|_| String::from(DEFAULT_NETWORK_ID)),
        );
        map.insert(
            String::from(DATA_DIR_KEY),
            env::var(DATA_DIR_KEY).unwrap_or_else(|_| String::from(DEFAULT_DATA_DIR)),
        );

        if let Ok(node_id) = env::var(NODE_ID_KEY) {
            map.insert(String::from(NODE_ID_KEY), node_id);
        }
        if let Ok(peers) = env::var(BOOTSTRAP_PEERS_KEY) {
            map.insert(String::from(BOOTSTRAP_PEERS_KEY), peers);
        }

        Config {
            inner: RwLock::new(map),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        let inner = self
            .inner
            .read()
            .expect("Failed to acquire read lock on config - this should never happen");
        inner.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut inner = self
            .inner
            .write()
            .expect("Failed to acquire write lock on config - this should never happen");
        inner.insert(String::from(key), value);
    }

    pub fn get_node_addr(&self) -> String {
        self.get(NODE_ADDRESS_KEY)
            .expect("Node address should always be present in config")
    }

    pub fn set_node_addr(&self, addr: String) {
        self.set(NODE_ADDRESS_KEY, addr);
    }

    pub fn get_network_id(&self) -> String {
        self.get(NETWORK_ID_KEY)
            .expect("Network id should always be present in config")
    }

    pub fn get_data_dir(&self) -> String {
        self.get(DATA_DIR_KEY)
            .expect("Data dir should always be present in config")
    }

    pub fn set_mining_addr(&self, addr: String) {
        self.set(MINING_ADDRESS_KEY, addr);
    }

    pub fn get_mining_addr(&self) -> Option<String> {
        self.get(MINING_ADDRESS_KEY)
    }

    pub fn is_miner(&self) -> bool {
        self.get(MINING_ADDRESS_KEY).is_some()
    }

    pub fn set_node_id(&self, node_id: String) {
        self.set(NODE_ID_KEY, node_id);
    }

    pub fn get_node_id(&self) -> Option<String> {
        self.get(NODE_ID_KEY)
    }

    /// Bootstrap peer list, comma-separated in the environment.
    pub fn get_bootstrap_peers(&self) -> Vec<String> {
        match self.get(BOOTSTRAP_PEERS_KEY) {
            Some(peers) => peers
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            None => vec![],
        }
    }

    /// Extract node ID from address (e.g., "127.0.0.1:2001" -> "2001")
    pub fn extract_node_id_from_addr(&self) -> String {
        let addr = self.get_node_addr();
        if let Some(port) = addr.split(':').next_back() {
            port.to_string()
        } else {
            "default".to_string()
        }
    }
}
