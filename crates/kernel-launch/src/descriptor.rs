use std::fmt;

use crate::error::{RuntimeError, RuntimeResult};
use crate::loader::KernelFunction;

/// Three-dimensional launch extent. Components are always at least 1 once
/// validated by [`LaunchDescriptor::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(x: u32) -> Self {
        Self { x, y: 1, z: 1 }
    }

    /// Total element count. Three `u32` extents can exceed `u64`.
    pub fn volume(self) -> u128 {
        u128::from(self.x) * u128::from(self.y) * u128::from(self.z)
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Immutable launch configuration: which function to run and over what geometry.
///
/// Only host-checkable constraints are enforced here. Device limits (maximum
/// threads per block, shared memory per block, grid extents) are left to the
/// driver and surface as [`RuntimeError::Launch`].
#[derive(Debug, Clone)]
pub struct LaunchDescriptor {
    function: KernelFunction,
    shared_mem_bytes: u32,
    grid: Dim3,
    block: Dim3,
}

impl LaunchDescriptor {
    /// Validates every component before any driver interaction. Each dimension
    /// must be in `1..=u32::MAX`; shared memory must be in `0..=u32::MAX`.
    pub fn new(
        function: KernelFunction,
        shared_mem_bytes: i64,
        grid: [i64; 3],
        block: [i64; 3],
    ) -> RuntimeResult<Self> {
        let grid = Dim3::new(
            dimension("grid.x", grid[0])?,
            dimension("grid.y", grid[1])?,
            dimension("grid.z", grid[2])?,
        );
        let block = Dim3::new(
            dimension("block.x", block[0])?,
            dimension("block.y", block[1])?,
            dimension("block.z", block[2])?,
        );
        let shared_mem_bytes = u32::try_from(shared_mem_bytes).map_err(|_| {
            RuntimeError::InvalidLaunchConfig {
                field: "shared_mem_bytes",
                value: shared_mem_bytes,
            }
        })?;
        Ok(Self {
            function,
            shared_mem_bytes,
            grid,
            block,
        })
    }

    /// Same checks as [`LaunchDescriptor::new`] for already-unsigned geometry.
    pub fn from_dims(
        function: KernelFunction,
        shared_mem_bytes: u32,
        grid: Dim3,
        block: Dim3,
    ) -> RuntimeResult<Self> {
        Self::new(
            function,
            i64::from(shared_mem_bytes),
            [grid.x, grid.y, grid.z].map(i64::from),
            [block.x, block.y, block.z].map(i64::from),
        )
    }

    pub fn function(&self) -> &KernelFunction {
        &self.function
    }

    pub fn shared_mem_bytes(&self) -> u32 {
        self.shared_mem_bytes
    }

    pub fn grid(&self) -> Dim3 {
        self.grid
    }

    pub fn block(&self) -> Dim3 {
        self.block
    }
}

fn dimension(field: &'static str, value: i64) -> RuntimeResult<u32> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or(RuntimeError::InvalidLaunchConfig { field, value })
}
