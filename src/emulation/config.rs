//! Emulation configuration types.
//!
//! # Overview
//!
//! - [`EmulationConfig`] - Top-level configuration container
//! - [`EmulationLimits`] - Execution limits (instructions, call depth, heap objects)
//!
//! # Configuration Presets
//!
//! - [`EmulationConfig::default()`] - Generous limits for tests and demos
//! - [`EmulationConfig::minimal()`] - Tight limits for small, bounded snippets
//!
//! # Example
//!
//! ```rust
//! use dotpatch::emulation::{EmulationConfig, EmulationLimits};
//!
//! let config = EmulationConfig {
//!     limits: EmulationLimits::new()
//!         .with_max_instructions(50_000)
//!         .with_max_call_depth(16),
//!     ..Default::default()
//! };
//! assert!(config.zero_init_locals);
//! ```

/// Configuration of the reference runtime.
///
/// # Default Configuration
///
/// - 10 million instruction limit
/// - 1000 call depth limit
/// - 1 million heap objects
/// - Locals are zero-initialized (`.locals init`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulationConfig {
    /// Execution limits controlling resource usage.
    pub limits: EmulationLimits,

    /// Whether locals start out with the default value of their type.
    ///
    /// When disabled every local starts as `null`, which makes reads of unassigned
    /// value-type locals show up as type mismatches.
    pub zero_init_locals: bool,
}

/// Execution limits.
///
/// A limit of `0` means unlimited.
///
/// # Defaults
///
/// | Limit              | Default    |
/// |--------------------|------------|
/// | `max_instructions` | 10,000,000 |
/// | `max_call_depth`   | 1,000      |
/// | `max_heap_objects` | 1,000,000  |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulationLimits {
    /// Maximum number of instructions executed per [`crate::emulation::Runtime::invoke`].
    pub max_instructions: u64,

    /// Maximum number of nested IL frames.
    pub max_call_depth: usize,

    /// Maximum number of live heap objects.
    pub max_heap_objects: usize,
}

impl Default for EmulationConfig {
    /// Creates a default emulation configuration.
    ///
    /// See the struct documentation for default values.
    fn default() -> Self {
        Self {
            limits: EmulationLimits::default(),
            zero_init_locals: true,
        }
    }
}

impl Default for EmulationLimits {
    /// Creates default execution limits.
    ///
    /// See the struct documentation for default values.
    fn default() -> Self {
        Self {
            max_instructions: 10_000_000,
            max_call_depth: 1000,
            max_heap_objects: 1_000_000,
        }
    }
}

impl EmulationConfig {
    /// Creates a minimal configuration for small, bounded snippets.
    ///
    /// # Settings
    ///
    /// - **Instruction limit**: 10,000
    /// - **Call depth**: 10
    /// - **Heap objects**: 1,000
    ///
    /// # Example
    ///
    /// ```rust
    /// use dotpatch::emulation::EmulationConfig;
    ///
    /// let config = EmulationConfig::minimal();
    /// assert_eq!(config.limits.max_call_depth, 10);
    /// ```
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            limits: EmulationLimits {
                max_instructions: 10_000,
                max_call_depth: 10,
                max_heap_objects: 1_000,
            },
            ..Default::default()
        }
    }
}

/// Builder methods for [`EmulationLimits`].
impl EmulationLimits {
    /// Creates new limits with default values.
    ///
    /// Equivalent to [`EmulationLimits::default()`]. Use the `with_*` methods
    /// to customize individual limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum instruction count.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum instructions to execute (0 for unlimited)
    #[must_use]
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    /// Sets the maximum call stack depth.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum nested method calls (0 for unlimited)
    #[must_use]
    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    /// Sets the maximum number of heap objects.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum objects that can be allocated (0 for unlimited)
    #[must_use]
    pub fn with_max_heap_objects(mut self, max: usize) -> Self {
        self.max_heap_objects = max;
        self
    }

    /// Returns `true` if `executed` instructions exceed the instruction limit.
    #[must_use]
    pub fn instructions_exceeded(&self, executed: u64) -> bool {
        self.max_instructions > 0 && executed > self.max_instructions
    }

    /// Returns `true` if a call at `depth` would exceed the call depth limit.
    #[must_use]
    pub fn depth_exceeded(&self, depth: usize) -> bool {
        self.max_call_depth > 0 && depth > self.max_call_depth
    }
}
