//! Shipyard Core Library
//!
//! Package and dependency deployment engine for CMS design objects:
//! exports dependency trees into portable archives, validates them against
//! a target server and installs them with identifier remapping and a
//! transaction log.

pub mod archive;
pub mod cache;
pub mod config;
pub mod context;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod fs;
pub mod idmap;
pub mod idtype;
pub mod installer;
pub mod job;
pub mod locks;
pub mod package;
pub mod registry;
pub mod repository;
pub mod types;
pub mod validate;

pub use error::{DeployError, ErrorCode, Result};

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConflictPolicy, EngineConfig, ImportSettings};
    pub use crate::context::DeployContext;

    // Dependencies
    pub use crate::dependency::{Dependency, DependencyGraphBuilder, PackageTree, TreeContext};
    pub use crate::types::{DependencyKey, DependencyKind};

    // Registry
    pub use crate::registry::{DependencyHandler, DependencyTypeRegistry, DocumentHandler};

    // Archive and descriptors
    pub use crate::archive::{Archive, ArchiveInfo, ArchiveManifest};
    pub use crate::descriptor::{ExportDescriptor, ImportDescriptor, PackageRef};

    // Identifiers
    pub use crate::idmap::{IdMap, IdMapStore, IdMapping};
    pub use crate::idtype::{DependencyIdTypes, IdType, IdTypeStore};

    // Repository
    pub use crate::repository::{FsObjectStore, ObjectRef, ObjectStore, StoredObject};

    // Jobs
    pub use crate::installer::PackageInstaller;
    pub use crate::job::{
        ExportJob, ExportReport, ImportJob, ImportReport, JobHandle, JobMonitor, JobStatus,
        ValidationJob, run_job,
    };
    pub use crate::validate::{DependencyValidator, ValidationResult, ValidationResults};

    pub use crate::error::{DeployError, Result};
}
