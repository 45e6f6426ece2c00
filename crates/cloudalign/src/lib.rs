#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use cloudalign_3d as cloud3d;

#[doc(inline)]
pub use cloudalign_registration as registration;
