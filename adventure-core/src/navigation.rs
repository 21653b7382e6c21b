use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::probe::ResourceProbe;
use crate::{DocumentId, PageHandle, PageIndex};

/// Anything that can be told which page to show.
pub trait PageDisplay: Send + Sync {
    fn show_page(&self, page: Option<PageHandle>);
}

/// Picks one of several successor pages. Returns the position within
/// `candidates`, or `None` when the user backs out.
pub trait ChoiceResolver {
    fn choose(&mut self, candidates: &[PageIndex]) -> Option<usize>;
}

impl<F> ChoiceResolver for F
where
    F: FnMut(&[PageIndex]) -> Option<usize>,
{
    fn choose(&mut self, candidates: &[PageIndex]) -> Option<usize> {
        self(candidates)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("branch option {position} is not a page index: {token:?}")]
pub struct BranchParseError {
    pub position: usize,
    pub token: String,
}

/// Successor candidates for one page, in file order. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSpec {
    candidates: Vec<PageIndex>,
}

impl BranchSpec {
    pub fn new(candidates: Vec<PageIndex>) -> Self {
        Self { candidates }
    }

    /// Whitespace separated decimal page indices.
    pub fn parse(text: &str) -> Result<Self, BranchParseError> {
        let candidates = text
            .split_whitespace()
            .enumerate()
            .map(|(position, token)| {
                PageIndex::parse(token).ok_or_else(|| BranchParseError {
                    position,
                    token: token.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { candidates })
    }

    pub fn candidates(&self) -> &[PageIndex] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("malformed branch options for page {page}: {source}")]
    MalformedBranch {
        page: PageIndex,
        source: BranchParseError,
    },
    #[error("the current page index is unknown")]
    UnknownPosition,
    #[error("choice {choice} is outside the {count} offered options")]
    InvalidChoice { choice: usize, count: usize },
}

/// Outcome of a navigation request. Hard I/O failures are reported through the
/// surrounding `Result` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Started { at: PageIndex },
    Advanced { from: PageIndex, to: PageIndex },
    Retreated { from: PageIndex, to: PageIndex },
    /// No resource exists for the successor.
    Ended,
    NoHistory,
    Cancelled,
    LoadError(LoadError),
}

/// Cursor over the adventure graph with exact backtracking.
pub struct Navigator {
    probe: Arc<dyn ResourceProbe>,
    display: Arc<dyn PageDisplay>,
    document: Option<DocumentId>,
    current: PageIndex,
    /// Previously visited indices; the last element is the most recent.
    history: Vec<PageIndex>,
    at_end: bool,
}

impl Navigator {
    pub fn new(
        probe: Arc<dyn ResourceProbe>,
        display: Arc<dyn PageDisplay>,
        start: PageIndex,
    ) -> Self {
        Self {
            probe,
            display,
            document: None,
            current: start,
            history: Vec::new(),
            at_end: false,
        }
    }

    pub fn position(&self) -> PageIndex {
        self.current
    }

    pub fn current_document(&self) -> Option<DocumentId> {
        self.document
    }

    /// Most recent first.
    pub fn history(&self) -> impl Iterator<Item = PageIndex> + '_ {
        self.history.iter().rev().copied()
    }

    pub fn history_depth(&self) -> usize {
        self.history.len()
    }

    pub fn is_at_end(&self) -> bool {
        self.at_end
    }

    /// Shows the starting page.
    #[instrument(skip(self), fields(page = %self.current))]
    pub fn start(&mut self) -> Result<Step> {
        if !self.current.is_known() {
            return Ok(Step::LoadError(LoadError::UnknownPosition));
        }
        if !self.probe.has_page(self.current) {
            self.at_end = true;
            return Ok(Step::Ended);
        }
        let handle = self.probe.open_page(self.current)?;
        self.document = Some(handle.document);
        self.display.show_page(Some(handle));
        self.at_end = false;
        info!(page = %self.current, "started");
        Ok(Step::Started { at: self.current })
    }

    #[instrument(skip(self, resolver), fields(page = %self.current))]
    pub fn advance(&mut self, resolver: &mut dyn ChoiceResolver) -> Result<Step> {
        if !self.current.is_known() {
            return Ok(Step::LoadError(LoadError::UnknownPosition));
        }

        let spec = if self.probe.has_branches(self.current) {
            let text = self.probe.open_branches(self.current)?;
            match BranchSpec::parse(&text) {
                Ok(spec) => spec,
                Err(source) => {
                    warn!(page = %self.current, %source, "malformed branch options");
                    return Ok(Step::LoadError(LoadError::MalformedBranch {
                        page: self.current,
                        source,
                    }));
                }
            }
        } else {
            BranchSpec::default()
        };

        let target = match spec.candidates() {
            [] => match self.current.successor() {
                Some(next) => next,
                None => {
                    self.at_end = true;
                    return Ok(Step::Ended);
                }
            },
            [only] => *only,
            candidates => {
                let Some(choice) = resolver.choose(candidates) else {
                    return Ok(Step::Cancelled);
                };
                match candidates.get(choice) {
                    Some(target) => *target,
                    None => {
                        return Ok(Step::LoadError(LoadError::InvalidChoice {
                            choice,
                            count: candidates.len(),
                        }))
                    }
                }
            }
        };

        if !self.probe.has_page(target) {
            info!(page = %self.current, %target, "no further content");
            self.at_end = true;
            return Ok(Step::Ended);
        }

        let handle = self.probe.open_page(target)?;
        self.document = Some(handle.document);
        self.display.show_page(Some(handle));
        self.history.push(self.current);
        let from = std::mem::replace(&mut self.current, target);
        self.at_end = false;
        info!(%from, to = %target, depth = self.history.len(), "advanced");
        Ok(Step::Advanced { from, to: target })
    }

    #[instrument(skip(self), fields(page = %self.current))]
    pub fn retreat(&mut self) -> Result<Step> {
        let Some(target) = self.history.pop() else {
            return Ok(Step::NoHistory);
        };

        let handle = match self.probe.open_page(target) {
            Ok(handle) => handle,
            Err(err) => {
                self.history.push(target);
                return Err(err);
            }
        };
        self.document = Some(handle.document);
        self.display.show_page(Some(handle));
        let from = std::mem::replace(&mut self.current, target);
        self.at_end = false;
        info!(%from, to = %target, depth = self.history.len(), "retreated");
        Ok(Step::Retreated { from, to: target })
    }
}
