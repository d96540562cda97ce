// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! drm_property: Blob properties and reference-counted blob replacement.

use std::collections::BTreeMap as Map;
use std::mem::size_of;
use std::sync::Arc;

use log::debug;
use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::dp_utils::*;

/// Immutable data attached to a blob property.
#[derive(Debug, PartialEq, Eq)]
pub struct PropertyBlob {
    id: u32,
    data: Vec<u8>,
}

impl PropertyBlob {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// All blobs of a device, keyed by id.  Ids start at 1; 0 means "no blob".
#[derive(Default)]
pub struct BlobRegistry {
    blobs: Map<u32, Arc<PropertyBlob>>,
    next_id: u32,
}

impl BlobRegistry {
    pub fn new() -> BlobRegistry {
        Default::default()
    }

    pub fn create_blob(&mut self, data: Vec<u8>) -> Arc<PropertyBlob> {
        self.next_id += 1;
        let blob = Arc::new(PropertyBlob {
            id: self.next_id,
            data,
        });
        self.blobs.insert(blob.id, blob.clone());
        blob
    }

    /// Looks up a blob, taking a reference to it.
    pub fn lookup_blob(&self, id: u64) -> Option<Arc<PropertyBlob>> {
        let id = u32::try_from(id).ok()?;
        self.blobs.get(&id).cloned()
    }

    /// Drops the registry's reference.  Properties still pointing at the blob keep it alive.
    pub fn destroy_blob(&mut self, id: u32) -> bool {
        self.blobs.remove(&id).is_some()
    }
}

/// Points `blob` at `new_blob`.  Returns true if the blob actually changed.
pub fn replace_blob(
    blob: &mut Option<Arc<PropertyBlob>>,
    new_blob: Option<Arc<PropertyBlob>>,
) -> bool {
    let unchanged = match (blob.as_ref(), new_blob.as_ref()) {
        (Some(old), Some(new)) => Arc::ptr_eq(old, new),
        (None, None) => true,
        _ => false,
    };
    if unchanged {
        return false;
    }

    *blob = new_blob;
    true
}

/// Replaces `blob` with the blob registered as `blob_id`, after checking its size.
///
/// `blob_id` 0 clears the property.  When given, `expected_size` must match the blob length
/// exactly and `expected_elem_size` must divide it.  Returns whether the blob was replaced; on
/// error `blob` is left alone.
pub fn replace_blob_from_id(
    registry: &BlobRegistry,
    blob: &mut Option<Arc<PropertyBlob>>,
    blob_id: u64,
    expected_size: Option<usize>,
    expected_elem_size: Option<usize>,
) -> DpResult<bool> {
    let mut new_blob = None;

    if blob_id != 0 {
        let found = registry.lookup_blob(blob_id).ok_or_else(|| {
            debug!("cannot find blob ID {}", blob_id);
            DpError::InvalidBlobId(blob_id)
        })?;

        if let Some(expected) = expected_size.filter(|&s| s > 0) {
            if found.len() != expected {
                debug!(
                    "[BLOB:{}] length {} different from expected {}",
                    found.id(),
                    found.len(),
                    expected
                );
                return Err(DpError::InvalidBlobLength {
                    blob_id: found.id(),
                    length: found.len(),
                    expected,
                });
            }
        }

        if let Some(elem_size) = expected_elem_size.filter(|&s| s > 0) {
            if found.len() % elem_size != 0 {
                debug!(
                    "[BLOB:{}] length {} not divisible by element size {}",
                    found.id(),
                    found.len(),
                    elem_size
                );
                return Err(DpError::InvalidBlobElementSize {
                    blob_id: found.id(),
                    length: found.len(),
                    elem_size,
                });
            }
        }

        new_blob = Some(found);
    }

    Ok(replace_blob(blob, new_blob))
}

/// 64 bit palette entry for HDR color processing.  Components are U32.32 fixed point.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct DrmColorLutExt {
    pub red: u64,
    pub green: u64,
    pub blue: u64,
    pub reserved: u64,
}

/// Decodes a blob holding an array of `DrmColorLutExt`.
pub fn color_lut_ext_from_blob(blob: &PropertyBlob) -> DpResult<Vec<DrmColorLutExt>> {
    let elem_size = size_of::<DrmColorLutExt>();
    if blob.len() % elem_size != 0 {
        return Err(DpError::InvalidBlobElementSize {
            blob_id: blob.id(),
            length: blob.len(),
            elem_size,
        });
    }

    blob.data()
        .chunks_exact(elem_size)
        .map(|entry| {
            DrmColorLutExt::read_from(entry).ok_or(DpError::InvalidBlobElementSize {
                blob_id: blob.id(),
                length: blob.len(),
                elem_size,
            })
        })
        .collect()
}
