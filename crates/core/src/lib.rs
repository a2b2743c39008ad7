//! Domain vocabulary for the stagesync job-progress protocol.
//!
//! Holds everything that does not touch the network: the ordered stage
//! catalogue, job identifiers, the progress-event parser, result wire
//! types, the scale parameter, and input validation.

pub mod error;
pub mod job_id;
pub mod result;
pub mod scale;
pub mod stages;
pub mod stream_event;
pub mod validation;
