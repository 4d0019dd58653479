//! Serializes a built [`crate::builder::MsfLayout`] back to on-disk bytes.
//!
//! Test-only: production code never needs to write a layout back out in one
//! shot (streams are written incrementally by a real writer, which is out of
//! scope here); this exists purely so `stream.rs`/`reader.rs` tests can build
//! a layout in memory and then read it back through the same code paths a
//! real file would go through.

use crate::builder::MsfLayout;
use zerocopy::IntoBytes;

pub(crate) fn serialize(layout: &MsfLayout) -> Vec<u8> {
    let block_size = layout.super_block.block_size.bytes();
    let num_blocks = layout.super_block.num_blocks;
    let mut buf = vec![0u8; num_blocks as usize * block_size as usize];

    let raw = layout.super_block.to_raw();
    buf[0..raw.as_bytes().len()].copy_from_slice(raw.as_bytes());

    let fpm_bytes = layout.free_page_map.to_fpm_block(block_size);
    write_block(&mut buf, block_size, layout.super_block.free_block_map_block, &fpm_bytes);

    let block_map_bytes: Vec<u8> = layout
        .directory_blocks
        .iter()
        .flat_map(|b| b.to_le_bytes())
        .collect();
    assert!(
        block_map_bytes.len() <= block_size as usize,
        "test fixture directory block array must fit in one block"
    );
    write_block(&mut buf, block_size, layout.super_block.block_map_addr, &block_map_bytes);

    let mut dir_payload = Vec::with_capacity(layout.super_block.num_directory_bytes as usize);
    dir_payload.extend_from_slice(&(layout.stream_sizes.len() as u32).to_le_bytes());
    for &size in layout.stream_sizes {
        dir_payload.extend_from_slice(&size.to_le_bytes());
    }
    for blocks in &layout.stream_map {
        for &b in *blocks {
            dir_payload.extend_from_slice(&b.to_le_bytes());
        }
    }
    assert_eq!(dir_payload.len() as u32, layout.super_block.num_directory_bytes);

    let mut remaining = dir_payload.as_slice();
    for &block in layout.directory_blocks {
        let take = remaining.len().min(block_size as usize);
        let (chunk, rest) = remaining.split_at(take);
        write_block(&mut buf, block_size, block, chunk);
        remaining = rest;
    }

    buf
}

fn write_block(buf: &mut [u8], block_size: u32, block: u32, data: &[u8]) {
    let start = block as u64 * block_size as u64;
    buf[start as usize..start as usize + data.len()].copy_from_slice(data);
}
