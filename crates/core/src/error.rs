use thiserror::Error;

/// Access outside the fixed-size non-volatile store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store access of {len} bytes at {offset} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("store backend failed: {0}")]
    Backend(String),
}

/// Rejected at registration time, before anything touches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("device '{device}' record ends at {end}, store capacity is {capacity}")]
    Overflow {
        device: String,
        end: usize,
        capacity: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IrrigationError {
    #[error("humidity range is degenerate (low {low}% equals high {high}%)")]
    DegenerateRange { low: f32, high: f32 },
    #[error("humidity reading {0} is not a number")]
    InvalidHumidity(f32),
    #[error("pump run of {0} s is out of range")]
    DurationOutOfRange(f32),
}
