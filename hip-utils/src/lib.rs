//
// Copyright (c) The Holo-HIP Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod bytes;
pub mod mac_addr;
pub mod task;

use tokio::sync::mpsc;

/// Channel sender alias used throughout the workspace for inter-task
/// communication, matching the bounded `tokio::sync::mpsc` channels the
/// protocol worker reads from.
pub type Sender<T> = mpsc::Sender<T>;
pub type Receiver<T> = mpsc::Receiver<T>;
