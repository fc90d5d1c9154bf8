use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MachineAuth {
    Password {
        password: String,
    },
    PrivateKeyPath {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    PrivateKey {
        pem: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

impl MachineAuth {
    pub fn method(&self) -> &'static str {
        match self {
            MachineAuth::Password { .. } => "password",
            MachineAuth::PrivateKeyPath { .. } => "private_key_path",
            MachineAuth::PrivateKey { .. } => "private_key",
        }
    }
}

impl fmt::Debug for MachineAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineAuth::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            MachineAuth::PrivateKeyPath { path, passphrase } => f
                .debug_struct("PrivateKeyPath")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            MachineAuth::PrivateKey { passphrase, .. } => f
                .debug_struct("PrivateKey")
                .field("pem", &"<redacted>")
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: MachineAuth,
}

/// Credential-free view handed to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineView {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: &'static str,
}

impl From<&Machine> for MachineView {
    fn from(machine: &Machine) -> Self {
        Self {
            id: machine.id.clone(),
            name: machine.name.clone(),
            host: machine.host.clone(),
            port: machine.port,
            username: machine.username.clone(),
            auth_method: machine.auth.method(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMachine {
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth: MachineAuth,
}

fn default_ssh_port() -> u16 {
    22
}

/// File-backed list of target machines.
pub struct MachineRegistry {
    path: PathBuf,
    machines: Mutex<Vec<Machine>>,
}

impl MachineRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let machines = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if contents.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&contents)
                    .with_context(|| format!("{} is invalid JSON", path.display()))?
            }
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            machines: Mutex::new(machines),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Machine>> {
        match self.machines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Recovering machine registry from poisoned lock");
                poisoned.into_inner()
            }
        }
    }

    pub fn list(&self) -> Vec<Machine> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Machine> {
        self.lock().iter().find(|machine| machine.id == id).cloned()
    }

    /// Resolves ids in request order, dropping unknown ones.
    pub fn resolve(&self, ids: &[String]) -> (Vec<Machine>, Vec<String>) {
        let store = self.lock();
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for id in ids {
            match store.iter().find(|machine| &machine.id == id) {
                Some(machine) if !found.iter().any(|m: &Machine| m.id == machine.id) => {
                    found.push(machine.clone());
                }
                Some(_) => {}
                None => missing.push(id.clone()),
            }
        }
        (found, missing)
    }

    pub fn create(&self, request: NewMachine) -> Result<Machine> {
        let host = request.host.trim();
        if host.is_empty() {
            return Err(anyhow!("Host is required"));
        }
        let username = request.username.trim();
        if username.is_empty() {
            return Err(anyhow!("Username is required"));
        }
        if request.port == 0 {
            return Err(anyhow!("Port must be non-zero"));
        }
        let name = match request.name.trim() {
            "" => host.to_string(),
            name => name.to_string(),
        };
        let machine = Machine {
            id: Uuid::new_v4().to_string(),
            name,
            host: host.to_string(),
            port: request.port,
            username: username.to_string(),
            auth: request.auth,
        };

        let mut store = self.lock();
        store.push(machine.clone());
        if let Err(err) = persist(&self.path, &store) {
            store.pop();
            return Err(err);
        }
        Ok(machine)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut store = self.lock();
        let Some(index) = store.iter().position(|machine| machine.id == id) else {
            return Ok(false);
        };
        let removed = store.remove(index);
        if let Err(err) = persist(&self.path, &store) {
            store.insert(index, removed);
            return Err(err);
        }
        Ok(true)
    }
}

fn persist(path: &Path, machines: &[Machine]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(machines)?)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
