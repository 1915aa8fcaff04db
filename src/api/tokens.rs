//! Credential rotation across several provider tokens.

use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{DebridDavError, DebridDavResult};

/// Masked view of one token for the management API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenStatus {
    pub token: String,
    pub current: bool,
    pub exhausted: bool,
    /// Seconds until the token becomes eligible again
    pub resets_in_secs: Option<u64>,
}

struct RotationState {
    current: usize,
    exhausted: Vec<Option<Instant>>,
}

/// Hands out the current usable token and rotates on bandwidth exhaustion.
///
/// Readers always get either a usable token or a definite error; they never
/// observe the rotation half done because state lives behind one lock.
pub struct TokenManager {
    tokens: Vec<String>,
    reset_after: Duration,
    state: RwLock<RotationState>,
}

impl TokenManager {
    pub fn new(tokens: Vec<String>, reset_after: Duration) -> Self {
        let exhausted = vec![None; tokens.len()];
        Self {
            tokens,
            reset_after,
            state: RwLock::new(RotationState {
                current: 0,
                exhausted,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// First configured token, used for catalog operations that do not
    /// consume bandwidth.
    pub fn primary(&self) -> DebridDavResult<String> {
        self.tokens
            .first()
            .cloned()
            .ok_or_else(|| DebridDavError::Configuration("no API token configured".to_string()))
    }

    /// Current usable token.
    pub fn current(&self) -> DebridDavResult<String> {
        if self.tokens.is_empty() {
            return Err(DebridDavError::Configuration(
                "no API token configured".to_string(),
            ));
        }

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if self.is_usable(&state, state.current) {
                return Ok(self.tokens[state.current].clone());
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match self.next_usable(&state, state.current) {
            Some(index) => {
                state.exhausted[index] = None;
                state.current = index;
                Ok(self.tokens[index].clone())
            }
            None => Err(DebridDavError::AllTokensExhausted),
        }
    }

    /// Mark `token` exhausted and move on. Returns true if another token is usable.
    pub fn mark_exhausted(&self, token: &str) -> bool {
        let Some(index) = self.tokens.iter().position(|t| t == token) else {
            return !self.all_exhausted();
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.exhausted[index].is_none() {
            warn!(token = %mask(token), "Token bandwidth exhausted");
        }
        state.exhausted[index] = Some(Instant::now());

        match self.next_usable(&state, index) {
            Some(next) => {
                if state.current == index {
                    info!(from = %mask(token), to = %mask(&self.tokens[next]), "Rotating token");
                    state.current = next;
                }
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.exhausted.iter_mut().for_each(|e| *e = None);
        state.current = 0;
        info!(tokens = self.tokens.len(), "Token exhaustion reset");
    }

    pub fn all_exhausted(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        !self.tokens.is_empty() && (0..self.tokens.len()).all(|i| !self.is_usable(&state, i))
    }

    pub fn status(&self) -> Vec<TokenStatus> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        self.tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                let resets_in = state.exhausted[i]
                    .map(|at| self.reset_after.saturating_sub(at.elapsed()))
                    .filter(|left| !left.is_zero());
                TokenStatus {
                    token: mask(token),
                    current: i == state.current,
                    exhausted: resets_in.is_some(),
                    resets_in_secs: resets_in.map(|d| d.as_secs()),
                }
            })
            .collect()
    }

    fn is_usable(&self, state: &RotationState, index: usize) -> bool {
        match state.exhausted[index] {
            None => true,
            Some(at) => at.elapsed() >= self.reset_after,
        }
    }

    /// First usable index after `from`, wrapping around and ending with `from` itself.
    fn next_usable(&self, state: &RotationState, from: usize) -> Option<usize> {
        let n = self.tokens.len();
        (1..=n)
            .map(|offset| (from + offset) % n)
            .find(|&i| self.is_usable(state, i))
    }
}

/// Show only the last four characters of a token.
pub fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
