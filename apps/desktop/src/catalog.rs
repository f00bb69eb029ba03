//! Published apps the store offers. Ships with a built-in list; a JSON file
//! with the same shape can replace it.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use shared::domain::{AppData, AppId};

const BUILTIN_CATALOG: &str = include_str!("../catalog.json");

pub struct Catalog {
    apps: Vec<AppData>,
}

impl Catalog {
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_CATALOG).context("built-in catalog is malformed")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog '{}'", path.display()))?;
        Self::parse(&raw).with_context(|| format!("failed to parse catalog '{}'", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        let apps: Vec<AppData> = serde_json::from_str(raw)?;
        Ok(Self { apps })
    }

    pub fn get(&self, id: &AppId) -> Option<&AppData> {
        self.apps.iter().find(|app| &app.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppData> {
        self.apps.iter()
    }
}
