pub mod encryption;

pub use encryption::Encryptor;
