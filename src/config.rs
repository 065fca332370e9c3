use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(name = "resultd", version, about = "Classwise result aggregation sidecar")]
pub struct Config {
    /// Workspace directory opened at start-up.
    #[arg(long, env = "RESULTD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    #[arg(long, env = "RESULTD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_flags() {
        let cfg = Config::try_parse_from(["resultd"]).expect("defaults");
        assert_eq!(cfg.log_level, "info");

        let cfg = Config::try_parse_from(["resultd", "--workspace", "/tmp/ws", "--log-level", "debug"])
            .expect("flags");
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.log_level, "debug");
    }
}
