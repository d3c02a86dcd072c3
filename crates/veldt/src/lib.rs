//! Veldt: a typed environment representation for robotics.
//!
//! An [`Environment`](env::Environment) owns a graph of coordinate
//! frames, map layers, and the operators that relate them. Client code
//! attaches items, wires relations, resolves rigid-body transforms
//! across the frame tree, observes changes through event handlers, and
//! round-trips the whole graph through a directory on disk.
//!
//! This is the facade crate re-exporting the public API of the Veldt
//! workspace; for most users a single `veldt` dependency is enough.
//!
//! # Quick start
//!
//! ```
//! use veldt::prelude::*;
//!
//! // A world with a camera frame one meter ahead of the root.
//! let mut env = Environment::new();
//! let root = env.root_frame().clone();
//! let camera = env
//!     .attach(Box::new(Frame::with_transform("camera", translation(1.0, 0.0, 0.0))))
//!     .unwrap();
//! env.add_frame_child(&root, &camera).unwrap();
//!
//! // A point cloud captured in the camera frame.
//! let cloud = env
//!     .attach(Box::new(Pointcloud::with_frame("cloud/", &camera)))
//!     .unwrap();
//! assert_eq!(cloud.as_str(), "/cloud0");
//!
//! // Points in the camera frame land one meter ahead in the root frame.
//! let t = env.relative_transform(&camera, &root).unwrap();
//! assert_eq!(t.translation.vector.x, 1.0);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`core`] | `veldt-core` | Items, ids, layers, operators, events, errors |
//! | [`env`] | `veldt-env` | The environment kernel |
//! | [`maps`] | `veldt-maps` | Point clouds, grids, slope extraction |
//! | [`storage`] | `veldt-serialize` | Manifest directories and event streams |
//! | [`transform`] | `veldt-transform` | Rigid motions with uncertainty |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Items, ids, layers, operators, events, and the error taxonomy.
pub mod core {
    pub use veldt_core::*;
}

/// The environment kernel.
pub mod env {
    pub use veldt_env::Environment;
}

/// Stock map items and operators.
pub mod maps {
    pub use veldt_maps::{register_builtin_maps, registry, Pointcloud, ScalarGrid, SlopeOperator};
}

/// Serialization: manifest directories and binary event streams.
pub mod storage {
    pub use veldt_serialize::*;
}

/// Rigid-body transform values.
pub mod transform {
    pub use veldt_transform::*;
}

/// The types most programs need.
pub mod prelude {
    pub use veldt_core::{
        EnvError, Event, EventHandler, Frame, HandlerError, Item, ItemId, Layer, LinkChange,
        Operator, OperatorContext, OperatorError,
    };
    pub use veldt_env::Environment;
    pub use veldt_maps::{Pointcloud, ScalarGrid, SlopeOperator};
    pub use veldt_serialize::{serialize_environment, unserialize_environment, Registry};
    pub use veldt_transform::{translation, Transform, TransformWithUncertainty};
}
