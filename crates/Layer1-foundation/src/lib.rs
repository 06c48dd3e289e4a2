//! # weft-foundation
//!
//! Foundation layer for Weft:
//! - Error: 중앙 에러 타입 (`Error`, `Result`)
//! - Types: 식별자와 프로퍼티 모델 (ServiceId, ModuleId, TypeTag, ServiceInstance)
//! - Filter: 프로퍼티 필터 (동등 비교 + AND/OR)
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  weft-core (Layer2)                                     │
//! │  ServiceRegistry / ServiceTracker / Dependency / Module │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │
//! ┌───────────────────────────▼─────────────────────────────┐
//! │  weft-foundation (Layer1)                               │
//! │  Error / ServiceId / TypeTag / Properties / Filter      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod filter;
pub mod types;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Types (식별자, 프로퍼티)
// ============================================================================
pub use types::{
    downcast_service,
    ranking_of,
    ListenerId,
    ModuleId,
    ServiceId,
    ServiceIdAllocator,
    ServiceInstance,
    ServiceProperties,
    TypeTag,
    SERVICE_RANKING,
};

// ============================================================================
// Filter (프로퍼티 필터)
// ============================================================================
pub use filter::PropertyFilter;
