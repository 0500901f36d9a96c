use std::time::SystemTime;

use serde::Serialize;

use crate::types::epoch_secs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Pending,
    Active,
    Recognized,
    Evaluated,
}

/// One word/phrase unit of the target sentence.
#[derive(Debug, Clone)]
pub struct SentenceBlock {
    pub text: String,
    pub block_id: usize,
    pub status: BlockStatus,
    pub score: Option<f32>,
    pub confidence: Option<f32>,
    pub recognized_at: Option<SystemTime>,
    pub evaluated_at: Option<SystemTime>,
}

impl SentenceBlock {
    fn new(text: String, block_id: usize) -> Self {
        Self {
            text,
            block_id,
            status: BlockStatus::Pending,
            score: None,
            confidence: None,
            recognized_at: None,
            evaluated_at: None,
        }
    }

    pub fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            text: self.text.clone(),
            block_id: self.block_id,
            status: self.status,
            score: self.score,
            confidence: self.confidence,
            recognized_at: self.recognized_at.map(epoch_secs),
            evaluated_at: self.evaluated_at.map(epoch_secs),
        }
    }
}

/// Serializable view of a block's current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSnapshot {
    pub text: String,
    pub block_id: usize,
    pub status: BlockStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognized_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<f64>,
}

/// Owns the ordered blocks of one sentence and the single active pointer.
///
/// Block ids are dense, contiguous and start at 0 in sentence order. At
/// most one block is `Active` at any time; the transition methods below
/// are the only way status moves.
pub struct SentenceBlockManager {
    blocks: Vec<SentenceBlock>,
    active_block_id: usize,
}

impl SentenceBlockManager {
    /// Splits on whitespace. Block 0 starts active.
    pub fn new(sentence: &str) -> Self {
        Self::from_parts(sentence.split_whitespace())
    }

    /// Splits on an explicit delimiter instead of whitespace.
    pub fn with_delimiter(sentence: &str, delimiter: &str) -> Self {
        Self::from_parts(sentence.split(delimiter))
    }

    fn from_parts<'a>(parts: impl Iterator<Item = &'a str>) -> Self {
        let blocks: Vec<SentenceBlock> = parts
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .enumerate()
            .map(|(i, t)| SentenceBlock::new(t.to_string(), i))
            .collect();

        let mut manager = Self {
            blocks,
            active_block_id: 0,
        };
        if let Some(first) = manager.blocks.first_mut() {
            first.status = BlockStatus::Active;
        }
        tracing::info!(blocks = manager.blocks.len(), "sentence split into blocks");
        manager
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[SentenceBlock] {
        &self.blocks
    }

    pub fn block(&self, block_id: usize) -> Option<&SentenceBlock> {
        self.blocks.get(block_id)
    }

    pub fn active_block_id(&self) -> usize {
        self.active_block_id
    }

    pub fn active_block(&self) -> Option<&SentenceBlock> {
        self.block(self.active_block_id)
    }

    /// Moves the active pointer. The previous active block falls back to
    /// `Pending`; out-of-range targets are rejected.
    pub fn set_active_block(&mut self, block_id: usize) -> bool {
        if block_id >= self.blocks.len() {
            return false;
        }
        if let Some(current) = self.blocks.get_mut(self.active_block_id) {
            if current.status == BlockStatus::Active {
                current.status = BlockStatus::Pending;
            }
        }
        self.active_block_id = block_id;
        // Recognized/Evaluated blocks keep their terminal status; only a
        // pending block is promoted when the pointer lands on it.
        let target = &mut self.blocks[block_id];
        if target.status == BlockStatus::Pending {
            target.status = BlockStatus::Active;
        }
        tracing::debug!(block_id, "active block changed");
        true
    }

    /// Advances to the next block; fails past the last one.
    pub fn advance_active_block(&mut self) -> bool {
        self.set_active_block(self.active_block_id + 1)
    }

    /// The `window_size` most recent blocks up to and including the active
    /// one, clipped at 0.
    pub fn recent_window(&self, window_size: usize) -> &[SentenceBlock] {
        if self.blocks.is_empty() {
            return &[];
        }
        let start = (self.active_block_id + 1).saturating_sub(window_size);
        let end = (self.active_block_id + 1).min(self.blocks.len());
        &self.blocks[start..end]
    }

    /// Sets a block's status, stamping `recognized_at`/`evaluated_at` on
    /// the corresponding transitions.
    pub fn update_status(&mut self, block_id: usize, status: BlockStatus) -> bool {
        let Some(block) = self.blocks.get_mut(block_id) else {
            return false;
        };
        block.status = status;
        match status {
            BlockStatus::Recognized => block.recognized_at = Some(SystemTime::now()),
            BlockStatus::Evaluated => block.evaluated_at = Some(SystemTime::now()),
            _ => {}
        }
        true
    }

    pub fn set_score(&mut self, block_id: usize, score: f32) -> bool {
        let Some(block) = self.blocks.get_mut(block_id) else {
            return false;
        };
        block.score = Some(score);
        true
    }

    pub fn snapshot(&self) -> Vec<BlockSnapshot> {
        self.blocks.iter().map(SentenceBlock::snapshot).collect()
    }

    /// All blocks back to `Pending` with scores and timestamps cleared;
    /// block 0 reactivated.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.status = BlockStatus::Pending;
            block.score = None;
            block.confidence = None;
            block.recognized_at = None;
            block.evaluated_at = None;
        }
        self.active_block_id = 0;
        if let Some(first) = self.blocks.first_mut() {
            first.status = BlockStatus::Active;
        }
    }
}
