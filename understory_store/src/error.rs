// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type for subscriber lifecycle misuse.

use crate::types::SubscriberId;

/// Errors returned by [`Subscriber`](crate::Subscriber) operations called in the wrong lifecycle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// `mount` was called on a subscriber that is already mounted.
    #[error("subscriber {0:?} is already mounted")]
    AlreadyMounted(SubscriberId),
    /// `unmount` was called on a subscriber that is not mounted.
    #[error("subscriber {0:?} is not mounted")]
    NotMounted(SubscriberId),
    /// The subscriber has been unmounted and cannot be used again.
    #[error("subscriber {0:?} has been unmounted")]
    Unmounted(SubscriberId),
}
