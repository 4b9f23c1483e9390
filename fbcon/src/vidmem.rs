//! Video Memory Allocator
//!
//! Off-screen surfaces are carved out of the video memory left over after
//! the primary display surface. The span is covered by one ordered list of
//! blocks: the head is the primary surface itself (always used), the rest
//! are either free or hold one auxiliary surface. Allocation is first-fit;
//! releases coalesce with free neighbours immediately.
//!
//! Every auxiliary surface shares the display pitch so blitters can address
//! all of video memory with one stride.

use alloc::vec::Vec;

use crate::{DisplayError, Result};

/// Index of the primary surface block
const HEAD: usize = 0;

/// Reference to an allocated block.
///
/// Handles go stale when their block is released; stale handles are
/// rejected rather than aliasing a later allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle {
    index: usize,
    generation: u32,
}

impl SurfaceHandle {
    /// The primary display surface
    pub const SCREEN: SurfaceHandle = SurfaceHandle {
        index: HEAD,
        generation: 0,
    };
}

/// One contiguous piece of the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Offset from the start of the primary surface
    pub base: usize,
    /// Size in bytes
    pub size: usize,
    /// Holds a surface
    pub used: bool,
    /// An accelerated operation on this block may still be in flight
    pub dirty: bool,
}

#[derive(Debug)]
struct Node {
    block: MemoryBlock,
    prev: Option<usize>,
    next: Option<usize>,
    generation: u32,
    live: bool,
}

/// First-fit, coalescing allocator over one span of video memory
#[derive(Debug)]
pub struct SurfaceAllocator {
    /// Node arena; list order is given by prev/next
    nodes: Vec<Node>,
    /// Arena slots available for reuse
    vacant: Vec<usize>,
    /// Display pitch shared by every surface
    pitch: usize,
    /// Bytes available for auxiliary surfaces
    memtotal: usize,
    /// Bytes currently free
    memleft: usize,
}

impl SurfaceAllocator {
    /// Set up the list over a span whose first `reserved` bytes are the
    /// primary surface, followed by `region_length` bytes of free memory.
    pub fn new(reserved: usize, region_length: usize, pitch: usize) -> Self {
        let mut allocator = Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            pitch,
            memtotal: region_length,
            memleft: region_length,
        };

        let screen = MemoryBlock {
            base: 0,
            size: reserved,
            used: true,
            dirty: false,
        };
        let head = allocator.insert_node(screen, None, None);

        if region_length > 0 {
            let free = MemoryBlock {
                base: reserved,
                size: region_length,
                used: false,
                dirty: false,
            };
            let index = allocator.insert_node(free, Some(head), None);
            allocator.nodes[head].next = Some(index);
        }

        log::debug!(
            "video memory: {} bytes reserved, {} bytes for surfaces, pitch {}",
            reserved,
            region_length,
            pitch
        );
        allocator
    }

    /// Allocate a `width` x `height` surface whose rows are `pitch` bytes.
    ///
    /// The surface is laid out with the display pitch, so `pitch` may not
    /// exceed it.
    pub fn allocate(&mut self, width: u32, height: u32, pitch: usize) -> Result<SurfaceHandle> {
        if pitch > self.pitch {
            return Err(DisplayError::SurfaceTooWide);
        }
        let size = height as usize * self.pitch;
        if size == 0 {
            return Err(DisplayError::InvalidSurface);
        }
        if size > self.memleft {
            return Err(DisplayError::OutOfMemory);
        }

        let index = self
            .iter_indices()
            .find(|&i| {
                let block = &self.nodes[i].block;
                !block.used && size <= block.size
            })
            .ok_or(DisplayError::Fragmented)?;

        let extra = self.nodes[index].block.size - size;
        if extra > 0 {
            let next = self.nodes[index].next;
            let leftover = MemoryBlock {
                base: self.nodes[index].block.base + size,
                size: extra,
                used: false,
                dirty: false,
            };
            let split = self.insert_node(leftover, Some(index), next);
            if let Some(next) = next {
                self.nodes[next].prev = Some(split);
            }
            self.nodes[index].next = Some(split);
        }

        let node = &mut self.nodes[index];
        node.block.used = true;
        node.block.size = size;
        node.block.dirty = false;
        self.memleft -= size;

        log::trace!(
            "allocated {}x{} surface: {} bytes at {:#x}",
            width,
            height,
            size,
            node.block.base
        );
        Ok(SurfaceHandle {
            index,
            generation: node.generation,
        })
    }

    /// Return a surface's memory and merge it with free neighbours.
    pub fn release(&mut self, handle: SurfaceHandle) -> Result<()> {
        let index = self.resolve(handle).ok_or(DisplayError::InvalidSurface)?;
        if index == HEAD || !self.nodes[index].block.used {
            return Err(DisplayError::InvalidSurface);
        }

        let node = &mut self.nodes[index];
        node.block.used = false;
        node.block.dirty = false;
        node.generation = node.generation.wrapping_add(1);
        self.memleft += node.block.size;

        if let Some(next) = self.nodes[index].next {
            if !self.nodes[next].block.used {
                let absorbed = self.nodes[next].block.size;
                let after = self.nodes[next].next;
                self.nodes[index].block.size += absorbed;
                self.nodes[index].next = after;
                if let Some(after) = after {
                    self.nodes[after].prev = Some(index);
                }
                self.retire(next);
            }
        }

        if let Some(prev) = self.nodes[index].prev {
            if !self.nodes[prev].block.used {
                let size = self.nodes[index].block.size;
                let after = self.nodes[index].next;
                self.nodes[prev].block.size += size;
                self.nodes[prev].next = after;
                if let Some(after) = after {
                    self.nodes[after].prev = Some(prev);
                }
                self.retire(index);
            }
        }

        Ok(())
    }

    /// Block behind a live handle
    pub fn block(&self, handle: SurfaceHandle) -> Option<&MemoryBlock> {
        let index = self.resolve(handle)?;
        let block = &self.nodes[index].block;
        block.used.then_some(block)
    }

    /// Record an outstanding accelerated operation on a surface.
    pub fn mark_busy(&mut self, handle: SurfaceHandle) -> Result<()> {
        let index = self.resolve(handle).ok_or(DisplayError::InvalidSurface)?;
        let block = &mut self.nodes[index].block;
        if !block.used {
            return Err(DisplayError::InvalidSurface);
        }
        block.dirty = true;
        Ok(())
    }

    pub fn is_busy(&self, handle: SurfaceHandle) -> bool {
        self.block(handle).map(|b| b.dirty).unwrap_or(false)
    }

    /// Forget every busy marker (the accelerator has gone idle).
    pub fn clear_busy(&mut self) {
        for index in self.iter_indices().collect::<Vec<_>>() {
            self.nodes[index].block.dirty = false;
        }
    }

    /// Blocks from the primary surface upwards
    pub fn blocks(&self) -> impl Iterator<Item = &MemoryBlock> + '_ {
        self.iter_indices().map(move |i| &self.nodes[i].block)
    }

    /// Bytes free for auxiliary surfaces
    pub fn free_bytes(&self) -> usize {
        self.memleft
    }

    /// Bytes managed for auxiliary surfaces
    pub fn total_bytes(&self) -> usize {
        self.memtotal
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    fn iter_indices(&self) -> impl Iterator<Item = usize> + '_ {
        core::iter::successors(Some(HEAD), move |&i| self.nodes[i].next)
    }

    fn resolve(&self, handle: SurfaceHandle) -> Option<usize> {
        let node = self.nodes.get(handle.index)?;
        (node.live && node.generation == handle.generation).then_some(handle.index)
    }

    fn insert_node(&mut self, block: MemoryBlock, prev: Option<usize>, next: Option<usize>) -> usize {
        match self.vacant.pop() {
            Some(index) => {
                let node = &mut self.nodes[index];
                node.block = block;
                node.prev = prev;
                node.next = next;
                node.live = true;
                index
            }
            None => {
                self.nodes.push(Node {
                    block,
                    prev,
                    next,
                    generation: 0,
                    live: true,
                });
                self.nodes.len() - 1
            }
        }
    }

    fn retire(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        node.live = false;
        node.prev = None;
        node.next = None;
        node.generation = node.generation.wrapping_add(1);
        self.vacant.push(index);
    }
}
