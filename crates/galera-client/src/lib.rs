pub mod captcha;
pub mod download;
pub mod ocr;
pub mod proxy;
pub mod transport;
pub mod wikipedia;

#[cfg(feature = "browser")]
pub mod browser;

#[cfg(test)]
pub(crate) mod testutil;

pub use captcha::TwoCaptchaBackend;
pub use download::FileDownloader;
pub use ocr::TesseractOcr;
pub use proxy::{ApiProxyProvider, ProxySource, StaticProxyList};
pub use transport::ReqwestTransport;
pub use wikipedia::WikipediaAdapter;

#[cfg(feature = "browser")]
pub use browser::{ChromiumLauncher, ChromiumSession};
