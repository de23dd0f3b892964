//! Test support
//!
//! Mock implementations of the identity exchange and broker transport so the
//! connection manager and façade can be exercised without a broker or an
//! identity provider.

pub mod mocks;
