pub mod backend;
pub mod documents;
pub mod premis;
