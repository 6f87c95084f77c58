//! End-to-end scenarios against a real SQLite database: full round
//! lifecycles driven by a manual clock, concurrent writers, and value
//! conservation across many rounds.

mod concurrency;
mod harness;
mod lifecycle;
