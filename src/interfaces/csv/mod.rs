//! Batch surface: payment requests in, responses out, both as CSV.

pub mod payment_reader;
pub mod response_writer;
