pub mod patch_service;

pub use patch_service::PatchService;
