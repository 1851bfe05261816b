//! End-to-end test support for the memory engine
//!
//! Hosts deterministic mock collaborators standing in for the external
//! NER, embedding, vector-index and belief-network services, plus
//! fixture helpers shared by the scenario suites.

pub mod mocks;
