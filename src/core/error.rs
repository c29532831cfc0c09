// src/core/error.rs

//! Error handling logic

use std::fmt;

/// Error types raised by the solver.
///
/// Configuration mistakes surface at the setter that caused them, numerical
/// ill-conditions surface from the solve pass that hit them. Name lookups
/// that the command surface tolerates (a `set_layer` on an unknown layer,
/// say) are warned about and ignored there; the query side reports them as
/// [`SimError::NotFound`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// A layer, material or pattern name (or a Fourier order) that the
    /// structure does not contain.
    NotFound {
        /// What kind of thing was looked up ("layer", "material", ...).
        kind: &'static str,
        /// The name or index that failed to resolve.
        name: String,
    },

    /// Inconsistent user input: mismatched amplitude/order list lengths,
    /// unsupported tensor structure, degenerate shape parameters.
    InputShape {
        /// InputShape failure message
        message: String,
    },

    /// `(I - A22 B11)` was singular while star-composing the scattering
    /// matrices of layers `span.0 ..= span.1`. This is a physical
    /// ill-condition (an evanescent-coupling resonance), not a bug; perturb
    /// the frequency or the geometry and retry.
    NumericalSingularity {
        /// The layer span whose composition failed.
        span: (usize, usize),
    },

    /// The dense eigensolver did not converge on a layer's modal problem.
    EigenFailure {
        /// Name of the offending layer.
        layer: String,
    },

    /// An internal invariant of the cumulative-matrix caches was violated.
    /// Indicates a bug in the bookkeeping, not a user error.
    CacheCoherence {
        /// CacheCoherence failure message
        message: String,
    },
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::NotFound { kind, name } => {
                write!(f, "{} \"{}\" not found", kind, name)
            }
            SimError::InputShape { message } => write!(f, "input shape error: {}", message),
            SimError::NumericalSingularity { span } => write!(
                f,
                "singular Redheffer composition over layers {}..={}",
                span.0, span.1
            ),
            SimError::EigenFailure { layer } => {
                write!(f, "eigendecomposition failed for layer \"{}\"", layer)
            }
            SimError::CacheCoherence { message } => {
                write!(f, "scattering-matrix cache incoherent: {}", message)
            }
        }
    }
}

impl std::error::Error for SimError {}
