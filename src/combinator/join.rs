//! Named join: run a set of futures concurrently and wait for all of them.
//!
//! Every branch is polled on each wake until it completes; no branch is
//! abandoned. The result keeps each output under its branch name, in the
//! order the branches were given, regardless of completion order.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use indexmap::IndexMap;

/// Future for [`join_named`].
#[must_use = "futures do nothing unless polled"]
pub struct JoinNamed<F: Future> {
    branches: Vec<Branch<F>>,
}

struct Branch<F: Future> {
    name: String,
    future: Option<F>,
    output: Option<F::Output>,
}

// Outputs are moved out, never pinned.
impl<F: Future + Unpin> Unpin for JoinNamed<F> {}

impl<F: Future> JoinNamed<F> {
    /// Number of branches that have not completed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.branches.iter().filter(|b| b.future.is_some()).count()
    }
}

/// Joins `branches`, resolving with every output keyed by name.
///
/// A repeated name keeps its first position; the later branch's output wins.
pub fn join_named<F, I>(branches: I) -> JoinNamed<F>
where
    F: Future,
    I: IntoIterator<Item = (String, F)>,
{
    JoinNamed {
        branches: branches
            .into_iter()
            .map(|(name, future)| Branch {
                name,
                future: Some(future),
                output: None,
            })
            .collect(),
    }
}

impl<F: Future + Unpin> Future for JoinNamed<F> {
    type Output = IndexMap<String, F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut pending = false;
        for branch in &mut this.branches {
            let Some(future) = branch.future.as_mut() else {
                continue;
            };
            match Pin::new(future).poll(cx) {
                Poll::Ready(value) => {
                    branch.output = Some(value);
                    branch.future = None;
                }
                Poll::Pending => pending = true,
            }
        }
        if pending {
            return Poll::Pending;
        }
        let outputs = this
            .branches
            .drain(..)
            .filter_map(|branch| branch.output.map(|value| (branch.name, value)))
            .collect();
        Poll::Ready(outputs)
    }
}
