use data_receiver::config::{Config as DataReceiverConfig, ValidationError};
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, Default)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// Filter directives used when RUST_LOG is not set
    pub level: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub data_receiver: Option<DataReceiverConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// The validated data receiver section.
    pub fn data_receiver(&self) -> Result<&DataReceiverConfig, ConfigError> {
        let config = self
            .data_receiver
            .as_ref()
            .ok_or(ConfigError::MissingSection("data_receiver"))?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("missing config section: {0}")]
    MissingSection(&'static str),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_receiver::config::ResponseMode;
    use data_receiver::registry::EntityRegistry;
    use row_store::config::StoreType;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn data_receiver_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                level: debug
            data_receiver:
                listener:
                    host: 0.0.0.0
                    port: 8000
                admin_listener:
                    host: 127.0.0.1
                    port: 8001
                response_mode: legacy
                store:
                    type: filesystem
                    base_dir: /var/lib/receiver/
                    filename: rows.bin
                entities:
                    person:
                        key: [hcode, cid]
                        fields:
                            hcode: {type: text, max_length: 9}
                            cid: {type: text, max_length: 13}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.common.metrics.as_ref().expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        let logging = config.common.logging.as_ref().expect("logging config");
        assert_eq!(logging.level.as_deref(), Some("debug"));
        assert!(logging.sentry_dsn.is_none());

        let data_receiver = config.data_receiver().expect("data receiver config");
        assert_eq!(data_receiver.listener.port, 8000);
        assert_eq!(data_receiver.response_mode, ResponseMode::Legacy);
        assert_eq!(
            data_receiver.store.r#type,
            StoreType::Filesystem {
                base_dir: "/var/lib/receiver/".into(),
                filename: "rows.bin".into(),
            }
        );
    }

    #[test]
    fn missing_and_invalid_sections() {
        let tmp = write_tmp_file("metrics:\n  statsd_host: localhost\n  statsd_port: 8125\n");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.data_receiver(),
            Err(ConfigError::MissingSection("data_receiver"))
        ));

        let yaml = r#"
            data_receiver:
                listener: {host: 0.0.0.0, port: 0}
                admin_listener: {host: 127.0.0.1, port: 8001}
                entities:
                    person:
                        key: [hcode]
                        fields:
                            hcode: {type: text}
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(matches!(
            config.data_receiver(),
            Err(ConfigError::Invalid(ValidationError::InvalidPort))
        ));

        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/receiver.yaml")),
            Err(ConfigError::LoadError(_))
        ));

        let tmp = write_tmp_file("data_receiver: [not, a, map]");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn shipped_config_is_valid() {
        let tmp = write_tmp_file(include_str!("../../config/receiver.yaml"));
        let config = Config::from_file(tmp.path()).expect("load config");
        let data_receiver = config.data_receiver().expect("valid config");

        let registry = EntityRegistry::from_config(data_receiver).expect("registry");
        let names: Vec<_> = registry.descriptors().iter().map(|d| d.name()).collect();
        assert_eq!(
            names,
            vec![
                "person",
                "dx_opd",
                "dx_ipd",
                "operation_opd",
                "operation_ipd",
                "service",
                "admission"
            ]
        );

        let person = registry.resolve("cmu_dent_person").expect("alias");
        assert_eq!(person.name(), "person");
        assert_eq!(person.key_fields(), ["hcode", "cid"]);

        let operation_ipd = registry.resolve("operation_ipd").expect("entity");
        assert_eq!(operation_ipd.key_fields(), ["hcodedrg", "cid", "datesev"]);
        for name in ["dx_opd", "dx_ipd", "operation_opd", "service", "admission"] {
            let descriptor = registry.resolve(name).expect("entity");
            assert_eq!(descriptor.key_fields(), ["hcode", "cid", "datesev"]);
        }
    }
}
