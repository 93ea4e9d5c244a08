//! pylon-client - Outbound HTTP for the Pylon gateway
//!
//! Everything that leaves the process over HTTP lives here: the payment
//! facilitator, the leaf capability backends, the service marketplace, and
//! the LLM chain planner, plus the retry/breaker wrapper that guards
//! backend calls.

pub mod backend;
pub mod bazaar;
pub mod error;
pub mod facilitator;
pub mod planner;
pub mod reliability;

pub use backend::{BackendBody, BackendCaller, BackendResponse, BYPASS_HEADER};
pub use bazaar::BazaarClient;
pub use error::CallError;
pub use facilitator::{FacilitatorClient, PaymentQuote, VerifyOutcome, X402_VERSION};
pub use planner::{ChainPlanner, ProposedPlan};
pub use reliability::{call_with_reliability, CallOutcome};
