//! Key Management System for RTP media services
//!
//! Provides secure key storage, retrieval, and rotation capabilities.
//! Supports local encrypted storage with extensibility for future KMS/HSM integration.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


pub mod error;
pub mod key_store;
pub mod key_types;
pub mod local_store;
pub mod kms;
pub mod service_integration;

pub use error::{KeyError, KeyResult};
pub use key_store::KeyStore;
pub use key_types::{KeyId, KeyType, KeyVersion, KeyMetadata};
pub use service_integration::*;

