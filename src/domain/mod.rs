// ==========================================
// 灌装线生产执行系统 - 领域层
// ==========================================

pub mod acumula;
pub mod bottle_counter;
pub mod delete_audit;
pub mod metricas;
pub mod order;
pub mod pause;
pub mod types;

pub use acumula::Acumula;
pub use bottle_counter::BottleCounter;
pub use delete_audit::OrderDeleteAudit;
pub use metricas::Metricas;
pub use order::{ExtraData, Order};
pub use pause::Pause;
pub use types::{EstadoOrder, TipoPausa};
