//! Observability helpers shared by the agent's flows.
//!
//! Every flow runs inside a `quota_agent.flow` span carrying `flow` and `stage` fields. With the
//! `metrics` feature enabled, each attempt/success/failure also increments the
//! `quota_agent_flow_total` counter, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Browser-driven authorization code + PKCE sign-in.
	SignIn,
	/// Access-token refresh.
	Refresh,
	/// Backend spawn/reuse.
	EnsureBackend,
	/// Usage fetch and parse.
	FetchQuota,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::SignIn => "sign_in",
			FlowKind::Refresh => "refresh",
			FlowKind::EnsureBackend => "ensure_backend",
			FlowKind::FetchQuota => "fetch_quota",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Runs `fut` inside a [`FlowSpan`] and records attempt plus final outcome.
pub async fn observe<T, Fut>(kind: FlowKind, stage: &'static str, fut: Fut) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	let span = FlowSpan::new(kind, stage);

	record_flow_outcome(kind, FlowOutcome::Attempt);

	let result = span.instrument(fut).await;

	match &result {
		Ok(_) => record_flow_outcome(kind, FlowOutcome::Success),
		Err(e) => {
			::tracing::debug!(flow = kind.as_str(), stage, error = %e, "flow failed");
			record_flow_outcome(kind, FlowOutcome::Failure);
		},
	}

	result
}
