//! 具体渠道实现

pub mod audio;
pub mod banner;
pub mod desktop;

pub use audio::{AudioChannel, AudioConfig};
pub use banner::{BannerChannel, BannerConfig, BannerEvent};
pub use desktop::{DesktopChannel, DesktopConfig};
