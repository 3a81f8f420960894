//! Nested progress states.
//! 嵌套的进度状态。

use thiserror::Error;
use tracing::{info, warn};

/// State tracking errors.
/// 状态跟踪错误。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("finish called on empty state list")]
    Empty,

    #[error("state finish mismatch: current: {current}, state: {state}")]
    Mismatch { current: String, state: String },

    #[error("all_done called with pending states: {}", .0.join(","))]
    Pending(Vec<String>),
}

/// Stack of named states, each started and finished in LIFO order.
/// 命名状态栈，按后进先出顺序开始和结束。
#[derive(Debug, Default)]
pub struct StateTracker {
    stack: Vec<String>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, state: &str) {
        self.stack.push(state.to_string());
        info!("Start: {state}");
    }

    pub fn finish(&mut self, state: &str) -> Result<(), StateError> {
        let current = self.stack.pop().ok_or(StateError::Empty)?;
        if current != state {
            return Err(StateError::Mismatch {
                current,
                state: state.to_string(),
            });
        }
        info!("Finish: {state}");
        Ok(())
    }

    /// Innermost state, if any.
    /// 最内层的状态（如有）。
    pub fn current(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Drop states above `depth` after a failure.
    /// 失败后丢弃高于 `depth` 的状态。
    pub fn unwind(&mut self, depth: usize) {
        while self.stack.len() > depth {
            if let Some(state) = self.stack.pop() {
                warn!("Abandoned: {state}");
            }
        }
    }

    pub fn all_done(&self) -> Result<(), StateError> {
        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(StateError::Pending(self.stack.clone()))
        }
    }
}
