pub mod export;
pub mod posterior;
