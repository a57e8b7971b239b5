//! Scenario window to token sequence extraction

use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::SensorResult;
use crate::index::LogRecordIndex;
use crate::models::{ScenarioWindow, ScenarioWindowParams, Timestamp, Token};

/// Where an accessor's tokens come from
#[derive(Debug, Clone, PartialEq)]
pub enum TokenSource {
    /// Single-instant mode: exactly the one caller-supplied token
    InitialToken(Token),
    /// Every `stride`-th record in the window
    Window(ScenarioWindow),
}

/// Ordered tokens covering a scenario, ascending by timestamp
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenSequence {
    tokens: Vec<Token>,
}

impl TokenSequence {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }

    pub fn single(token: Token) -> Self {
        Self {
            tokens: vec![token],
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, iteration: usize) -> Option<&Token> {
        self.tokens.get(iteration)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter()
    }
}

impl<'a> IntoIterator for &'a TokenSequence {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.iter()
    }
}

/// Turns scenario windows into token sequences using a log index
#[derive(Clone)]
pub struct TokenExtractor {
    index: Arc<dyn LogRecordIndex>,
}

impl TokenExtractor {
    pub fn new(index: Arc<dyn LogRecordIndex>) -> Self {
        Self { index }
    }

    /// Tokens with timestamps in `[start, end)`, keeping every `stride`-th one
    /// starting with the first
    pub async fn extract(&self, window: &ScenarioWindow) -> SensorResult<TokenSequence> {
        let (start, end, stride) = (window.start(), window.end(), window.stride());
        let candidates = self.index.list_tokens_in_range(start, end).await?;
        let total = candidates.len();

        let tokens: Vec<Token> = select_strided(candidates, stride)
            .into_iter()
            .map(|(token, _)| token)
            .collect();

        info!(
            "Extracted {} of {} tokens from log '{}' in [{}, {}) with stride {}",
            tokens.len(),
            total,
            self.index.log_name(),
            start,
            end,
            stride
        );
        Ok(TokenSequence::new(tokens))
    }

    /// Validates an unchecked window before any timestamp arithmetic, then extracts
    pub async fn extract_params(
        &self,
        params: &ScenarioWindowParams,
    ) -> SensorResult<TokenSequence> {
        let window = ScenarioWindow::try_from(*params)?;
        self.extract(&window).await
    }

    pub async fn resolve(&self, source: &TokenSource) -> SensorResult<TokenSequence> {
        match source {
            TokenSource::InitialToken(token) => {
                debug!("Single-instant mode at token {}", token);
                Ok(TokenSequence::single(token.clone()))
            }
            TokenSource::Window(window) => self.extract(window).await,
        }
    }
}

/// Keeps indices 0, stride, 2*stride, ... of a timestamp-ordered list
fn select_strided(
    mut candidates: Vec<(Token, Timestamp)>,
    stride: usize,
) -> Vec<(Token, Timestamp)> {
    // stable: equal timestamps keep index order
    candidates.sort_by(|a, b| a.1.cmp(&b.1));
    candidates.into_iter().step_by(stride.max(1)).collect()
}
