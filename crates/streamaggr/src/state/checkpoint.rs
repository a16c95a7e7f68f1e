//! Checkpoints of pipeline state
//!
//! A checkpoint holds the serialized state of every operator in schedule
//! order together with the configuration it was produced under, so a restore
//! can refuse state that no longer matches the pipeline. Checkpoints can be
//! kept in memory as bytes or written to disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 2;

/// Checkpoint metadata
///
/// Contains information about a checkpoint including when it was created,
/// how many operators it covers, and whether it's been validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Unique checkpoint identifier
    pub checkpoint_id: String,
    /// Name of the pipeline the state belongs to
    pub pipeline: String,
    /// When the checkpoint was created
    pub created_at: DateTime<Utc>,
    /// Number of operator states in the checkpoint
    pub entry_count: usize,
    /// Total size of the serialized operator states in bytes
    pub size_bytes: u64,
    /// Checksum for integrity verification
    pub checksum: String,
    /// Whether this checkpoint has been validated
    pub validated: bool,
    /// Version of the checkpoint format
    pub version: u32,
}

impl CheckpointMetadata {
    pub fn new(pipeline: String, entry_count: usize, size_bytes: u64, checksum: String) -> Self {
        Self {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            pipeline,
            created_at: Utc::now(),
            entry_count,
            size_bytes,
            checksum,
            validated: false,
            version: CHECKPOINT_VERSION,
        }
    }
}

/// Saved state of one operator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatorCheckpoint {
    /// Operator name
    pub name: String,
    /// Operator `type` tag
    pub kind: String,
    /// Operator configuration as JSON
    pub config: String,
    /// bincode-encoded operator state
    pub state: Vec<u8>,
}

/// A checkpoint containing operator states and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint metadata
    pub metadata: CheckpointMetadata,
    /// Operator states in schedule order
    pub operators: Vec<OperatorCheckpoint>,
    /// Last timestamp seen per store
    pub clocks: Vec<(String, i64)>,
}

impl Checkpoint {
    pub fn new(
        pipeline: String,
        operators: Vec<OperatorCheckpoint>,
        clocks: Vec<(String, i64)>,
    ) -> Self {
        let size_bytes = operators.iter().map(|op| op.state.len()).sum::<usize>() as u64;
        let checksum = Self::calculate_checksum(&operators, &clocks);

        Self {
            metadata: CheckpointMetadata::new(pipeline, operators.len(), size_bytes, checksum),
            operators,
            clocks,
        }
    }

    /// SHA-256 over every operator field and store clock, each length-prefixed
    ///
    /// Integers are little-endian so the digest is the same on every platform.
    fn calculate_checksum(operators: &[OperatorCheckpoint], clocks: &[(String, i64)]) -> String {
        fn field(hasher: &mut Sha256, bytes: &[u8]) {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }

        let mut hasher = Sha256::new();
        for op in operators {
            field(&mut hasher, op.name.as_bytes());
            field(&mut hasher, op.kind.as_bytes());
            field(&mut hasher, op.config.as_bytes());
            field(&mut hasher, &op.state);
        }
        for (store, ts) in clocks {
            field(&mut hasher, store.as_bytes());
            hasher.update(ts.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Validate format version and integrity
    pub fn validate(&mut self) -> StateResult<()> {
        if self.metadata.version != CHECKPOINT_VERSION {
            return Err(StateError::RestoreFailed {
                checkpoint_id: self.metadata.checkpoint_id.clone(),
                reason: format!(
                    "unsupported checkpoint version {} (expected {})",
                    self.metadata.version, CHECKPOINT_VERSION
                ),
            });
        }

        let calculated_checksum = Self::calculate_checksum(&self.operators, &self.clocks);
        if calculated_checksum != self.metadata.checksum {
            return Err(StateError::RestoreFailed {
                checkpoint_id: self.metadata.checkpoint_id.clone(),
                reason: format!(
                    "Checksum mismatch: expected {}, got {}",
                    self.metadata.checksum, calculated_checksum
                ),
            });
        }

        self.metadata.validated = true;
        Ok(())
    }

    /// Encode the whole checkpoint
    pub fn to_bytes(&self) -> StateResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StateError::SerializationFailed {
            key: self.metadata.checkpoint_id.clone(),
            reason: e.to_string(),
        })
    }

    /// Decode and validate a checkpoint
    pub fn from_bytes(bytes: &[u8]) -> StateResult<Self> {
        let mut checkpoint: Checkpoint =
            bincode::deserialize(bytes).map_err(|e| StateError::DeserializationFailed {
                key: "checkpoint".to_string(),
                reason: e.to_string(),
            })?;
        checkpoint.validate()?;
        debug!(
            checkpoint_id = %checkpoint.metadata.checkpoint_id,
            operators = checkpoint.metadata.entry_count,
            "checkpoint decoded"
        );
        Ok(checkpoint)
    }

    /// Save checkpoint to a file
    pub async fn save<P: AsRef<Path>>(&self, path: P) -> StateResult<()> {
        let path = path.as_ref();
        info!("Saving checkpoint {} to {:?}", self.metadata.checkpoint_id, path);

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StateError::CheckpointFailed {
                    checkpoint_id: self.metadata.checkpoint_id.clone(),
                    reason: format!("Failed to create directory: {}", e),
                }
            })?;
        }

        let serialized = self.to_bytes()?;

        tokio::fs::write(path, &serialized).await.map_err(|e| {
            StateError::CheckpointFailed {
                checkpoint_id: self.metadata.checkpoint_id.clone(),
                reason: format!("Failed to write file: {}", e),
            }
        })?;

        info!(
            "Checkpoint saved: {} operators, {} bytes",
            self.metadata.entry_count, self.metadata.size_bytes
        );

        Ok(())
    }

    /// Load checkpoint from a file
    pub async fn load<P: AsRef<Path>>(path: P) -> StateResult<Self> {
        let path = path.as_ref();
        info!("Loading checkpoint from {:?}", path);

        let data = tokio::fs::read(path).await.map_err(|e| {
            StateError::RestoreFailed {
                checkpoint_id: path.to_string_lossy().to_string(),
                reason: format!("Failed to read file: {}", e),
            }
        })?;

        let checkpoint = Self::from_bytes(&data)?;

        info!(
            "Checkpoint loaded: {} operators, {} bytes",
            checkpoint.metadata.entry_count, checkpoint.metadata.size_bytes
        );

        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Checkpoint {
        Checkpoint::new(
            "test".to_string(),
            vec![OperatorCheckpoint {
                name: "buf".to_string(),
                kind: "timeSeriesWinBuf".to_string(),
                config: "{}".to_string(),
                state: vec![1, 2, 3],
            }],
            vec![("store".to_string(), 42)],
        )
    }

    #[test]
    fn test_checkpoint_creation() {
        let checkpoint = sample();
        assert_eq!(checkpoint.metadata.entry_count, 1);
        assert_eq!(checkpoint.metadata.size_bytes, 3);
        assert_eq!(checkpoint.metadata.version, CHECKPOINT_VERSION);
        assert!(!checkpoint.metadata.validated);
    }

    #[test]
    fn test_checkpoint_validation() {
        let mut checkpoint = sample();
        assert!(checkpoint.validate().is_ok());
        assert!(checkpoint.metadata.validated);

        checkpoint.operators[0].state.push(4);
        assert!(checkpoint.validate().is_err());
    }

    #[test]
    fn test_checkpoint_checksum_is_fixed() {
        // must not change between builds, or older checkpoint files stop loading
        assert_eq!(
            sample().metadata.checksum,
            "bcf9aaa4182c38b6be2ea74e06ef9165dac37df0536c070cb16f563ae3aabcf2"
        );

        let mut moved = sample();
        moved.operators[0].name = "bu".to_string();
        moved.operators[0].kind = "ftimeSeriesWinBuf".to_string();
        assert_ne!(
            Checkpoint::calculate_checksum(&moved.operators, &moved.clocks),
            sample().metadata.checksum
        );
    }

    #[test]
    fn test_checkpoint_version_mismatch() {
        let mut checkpoint = sample();
        checkpoint.metadata.version = CHECKPOINT_VERSION + 1;
        assert!(matches!(
            checkpoint.validate(),
            Err(StateError::RestoreFailed { .. })
        ));
    }

    #[test]
    fn test_checkpoint_bytes_roundtrip() {
        let checkpoint = sample();
        let bytes = checkpoint.to_bytes().unwrap();
        let restored = Checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(restored.operators, checkpoint.operators);
        assert_eq!(restored.clocks, checkpoint.clocks);
        assert!(restored.metadata.validated);
    }

    #[test]
    fn test_checkpoint_rejects_garbage() {
        assert!(Checkpoint::from_bytes(&[0xff, 0x00, 0x13]).is_err());
    }

    #[tokio::test]
    async fn test_checkpoint_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("checkpoint.bin");

        let checkpoint = sample();
        checkpoint.save(&path).await.unwrap();

        let loaded = Checkpoint::load(&path).await.unwrap();
        assert_eq!(loaded.metadata.checkpoint_id, checkpoint.metadata.checkpoint_id);
        assert_eq!(loaded.operators, checkpoint.operators);
    }

    #[tokio::test]
    async fn test_checkpoint_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = Checkpoint::load(temp_dir.path().join("missing.bin")).await;
        assert!(matches!(result, Err(StateError::RestoreFailed { .. })));
    }
}
