pub mod aggregate;
pub mod badges;
pub mod magnitude;
pub mod rank;
