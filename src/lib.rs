// SPDX-License-Identifier: Apache-2.0

pub mod bounded_channel;
pub mod delivery;
pub mod discovery;
pub mod init;
pub mod registry;
pub mod tailer;
