//! 시뮬레이터 도메인 모델.

pub mod market;
pub mod scenario;
pub mod state;

pub use market::*;
pub use scenario::*;
pub use state::*;
