use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    Memory,
    Filesystem { base_dir: String, filename: String },
}

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Zstd1,
    Zstd3,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub r#type: StoreType,
    #[serde(default)]
    pub compression: Compression,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            r#type: StoreType::Memory,
            compression: Compression::default(),
        }
    }
}
