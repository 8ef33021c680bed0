//! 变更落地目标：实现器通过 ChangeStore 读取备份、写入与删除文件
//!
//! - InMemoryChangeStore：测试与预演
//! - FsChangeStore：以某个目录为根写磁盘，拒绝绝对路径与 `..` 逃逸
//!
//! 周期记录通过 CycleStore 持久化（数据服务客户端或 InMemoryCycleStore）

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::EvolverError;
use crate::evolution::types::EvolutionCycle;

#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// 读取当前内容；文件不存在时返回 None
    async fn read(&self, path: &str) -> Result<Option<String>, EvolverError>;

    async fn write(&self, path: &str, content: &str) -> Result<(), EvolverError>;

    /// 删除文件；不存在时视为成功
    async fn remove(&self, path: &str) -> Result<(), EvolverError>;
}

/// 校验相对路径：非空、非绝对、不含 `..`
pub fn validate_relative_path(path: &str) -> Result<(), EvolverError> {
    if path.trim().is_empty() {
        return Err(EvolverError::PathRejected("empty path".to_string()));
    }
    let p = Path::new(path);
    if p.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(EvolverError::PathRejected(format!("absolute path: {}", path)));
    }
    if p.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_))) {
        return Err(EvolverError::PathRejected(format!("path escapes root: {}", path)));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryChangeStore {
    files: RwLock<HashMap<String, String>>,
}

impl InMemoryChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, K, V>(files: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            files: RwLock::new(
                files
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.files.read().await.clone()
    }
}

#[async_trait]
impl ChangeStore for InMemoryChangeStore {
    async fn read(&self, path: &str) -> Result<Option<String>, EvolverError> {
        Ok(self.files.read().await.get(path).cloned())
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), EvolverError> {
        validate_relative_path(path)?;
        self.files
            .write()
            .await
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), EvolverError> {
        self.files.write().await.remove(path);
        Ok(())
    }
}

/// 以 root 为根的文件系统存储
#[derive(Debug, Clone)]
pub struct FsChangeStore {
    root: PathBuf,
}

impl FsChangeStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, EvolverError> {
        validate_relative_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ChangeStore for FsChangeStore {
    async fn read(&self, path: &str) -> Result<Option<String>, EvolverError> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), EvolverError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), EvolverError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 周期持久化：创建时写一次，结束时更新一次
#[async_trait]
pub trait CycleStore: Send + Sync {
    async fn create_cycle(&self, cycle: &EvolutionCycle) -> Result<(), EvolverError>;

    async fn update_cycle(&self, cycle: &EvolutionCycle) -> Result<(), EvolverError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCycleStore {
    cycles: RwLock<Vec<EvolutionCycle>>,
}

impl InMemoryCycleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn cycles(&self) -> Vec<EvolutionCycle> {
        self.cycles.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<EvolutionCycle> {
        self.cycles.read().await.iter().find(|c| c.id == id).cloned()
    }
}

#[async_trait]
impl CycleStore for InMemoryCycleStore {
    async fn create_cycle(&self, cycle: &EvolutionCycle) -> Result<(), EvolverError> {
        let mut cycles = self.cycles.write().await;
        if cycles.iter().any(|c| c.id == cycle.id) {
            return Err(EvolverError::Store(format!("cycle {} already exists", cycle.id)));
        }
        cycles.push(cycle.clone());
        Ok(())
    }

    async fn update_cycle(&self, cycle: &EvolutionCycle) -> Result<(), EvolverError> {
        let mut cycles = self.cycles.write().await;
        match cycles.iter_mut().find(|c| c.id == cycle.id) {
            Some(existing) => {
                *existing = cycle.clone();
                Ok(())
            }
            None => Err(EvolverError::Store(format!("cycle {} not found", cycle.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_relative_path() {
        assert!(validate_relative_path("src/modules/a/mod.rs").is_ok());
        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("src/../../secret").is_err());
    }

    #[tokio::test]
    async fn test_fs_store_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsChangeStore::new(dir.path());

        assert_eq!(store.read("src/a.rs").await.unwrap(), None);
        store.write("src/a.rs", "pub struct A;").await.unwrap();
        assert_eq!(store.read("src/a.rs").await.unwrap().as_deref(), Some("pub struct A;"));
        assert!(dir.path().join("src/a.rs").exists());

        store.remove("src/a.rs").await.unwrap();
        store.remove("src/a.rs").await.unwrap();
        assert_eq!(store.read("src/a.rs").await.unwrap(), None);

        assert!(matches!(
            store.write("../outside.rs", "x").await,
            Err(EvolverError::PathRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryChangeStore::with_files([("README.md", "hello")]);
        assert_eq!(store.read("README.md").await.unwrap().as_deref(), Some("hello"));
        store.write("src/b.rs", "fn b() {}").await.unwrap();
        store.remove("README.md").await.unwrap();
        let files = store.snapshot().await;
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("src/b.rs"));
    }

    #[tokio::test]
    async fn test_in_memory_cycle_store() {
        let store = InMemoryCycleStore::new();
        let mut cycle = EvolutionCycle::new("cycle-1");

        assert!(store.update_cycle(&cycle).await.is_err());
        store.create_cycle(&cycle).await.unwrap();
        assert!(store.create_cycle(&cycle).await.is_err());

        cycle.status = crate::evolution::types::CycleStatus::Complete;
        store.update_cycle(&cycle).await.unwrap();
        assert_eq!(store.get("cycle-1").await.unwrap().status, cycle.status);
        assert_eq!(store.cycles().await.len(), 1);
    }
}
