//! Shared fixtures: a relay context rooted in a temp dir, driven by a
//! scripted command runner

#![allow(dead_code)]

use relay_rs::config::Config;
use relay_rs::context::RelayContext;
use relay_rs::exec::mock::MockRunner;
use std::sync::Arc;
use tempfile::TempDir;

pub const STOCK_MAIN_CF: &str = "myhostname = mail.example.com\nmydestination = localhost\n";

pub struct Sandbox {
    pub root: TempDir,
    pub config: Config,
    pub runner: Arc<MockRunner>,
    pub relay: RelayContext,
}

impl Sandbox {
    pub fn main_cf(&self) -> String {
        std::fs::read_to_string(self.config.paths.main_cf()).unwrap()
    }

    pub fn sasl_passwd(&self) -> String {
        std::fs::read_to_string(self.config.paths.sasl_passwd()).unwrap()
    }
}

/// Fresh host running as root, with a stock main.cf and a Postfix that
/// reports healthy
pub fn sandbox() -> Sandbox {
    let root = TempDir::new().unwrap();
    let config = Config::rooted_at(root.path());
    std::fs::create_dir_all(&config.paths.postfix_dir).unwrap();
    std::fs::write(config.paths.main_cf(), STOCK_MAIN_CF).unwrap();

    let runner = Arc::new(MockRunner::new());
    runner.on_ok("systemctl is-active", "active\n");
    runner.on_ok("systemctl is-enabled", "enabled\n");
    runner.on_ok("id -u", "0\n");
    runner.on_ok("id -g", "0\n");

    let relay = RelayContext::from_config(config.clone(), runner.clone());
    Sandbox {
        root,
        config,
        runner,
        relay,
    }
}
