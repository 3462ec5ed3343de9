//! Moodsync reference server: revisioned mood documents, tombstones and
//! attachment blobs behind bearer API keys.

pub mod server;
