// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work submission.
//!
//! Provides an abstraction over how execution units are rendered and
//! started:
//! - Store submitter: pending unit records picked up by an external executor
//! - Mock submitter: for testing

pub mod mock;
pub mod store;
pub mod traits;

pub use mock::MockSubmitter;
pub use store::StoreSubmitter;
pub use traits::*;
