// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Item ⇄ bytes conversion.
//!
//! The queue never looks inside a payload; it is generic over a
//! [`DataConverter`] that is injected at construction time.

use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};

/// Error type returned by converters.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Converts queue items to and from payload bytes.
pub trait DataConverter: Send + Sync {
    /// The item type stored in the queue.
    type Item;

    fn serialize(&self, item: &Self::Item) -> Result<Vec<u8>, BoxedError>;

    fn deserialize(&self, data: &[u8]) -> Result<Self::Item, BoxedError>;
}

/// UTF-8 text items.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Converter;

impl DataConverter for Utf8Converter {
    type Item = String;

    fn serialize(&self, item: &String) -> Result<Vec<u8>, BoxedError> {
        Ok(item.as_bytes().to_vec())
    }

    fn deserialize(&self, data: &[u8]) -> Result<String, BoxedError> {
        Ok(String::from_utf8(data.to_vec())?)
    }
}

/// Opaque objects encoded with bincode through serde.
pub struct ObjectConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectConverter<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ObjectConverter<T> {
    fn default() -> Self { Self::new() }
}

impl<T> std::fmt::Debug for ObjectConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObjectConverter")
    }
}

impl<T> DataConverter for ObjectConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    type Item = T;

    fn serialize(&self, item: &T) -> Result<Vec<u8>, BoxedError> {
        Ok(bincode::serde::encode_to_vec(
            item,
            bincode::config::standard(),
        )?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<T, BoxedError> {
        let (item, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())?;
        Ok(item)
    }
}

/// Raw byte items, stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesConverter;

impl DataConverter for BytesConverter {
    type Item = Vec<u8>;

    fn serialize(&self, item: &Vec<u8>) -> Result<Vec<u8>, BoxedError> { Ok(item.clone()) }

    fn deserialize(&self, data: &[u8]) -> Result<Vec<u8>, BoxedError> { Ok(data.to_vec()) }
}
