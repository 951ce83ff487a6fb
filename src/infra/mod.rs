pub mod bias_store;
pub mod s3;
