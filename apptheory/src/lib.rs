//! AppTheory — a portable application runtime.
//!
//! This facade crate re-exports the AppTheory sub-crates through a single
//! dependency with feature flags.
//!
//! | Feature      | Default | Crate                  |
//! |--------------|---------|------------------------|
//! | `rate-limit` | **yes** | `apptheory-rate-limit` |
//! | `utils`      | **yes** | `apptheory-utils`      |
//! | `testkit`    | no      | `apptheory-test`       |
//! | `full`       | no      | All of the above       |

pub extern crate apptheory_core;

// Re-export everything from the core runtime at the top level.
pub use apptheory_core::*;

#[cfg(feature = "rate-limit")]
pub use apptheory_rate_limit;

#[cfg(feature = "utils")]
pub use apptheory_utils;

#[cfg(feature = "testkit")]
pub use apptheory_test;
