use crate::error::Result;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

/// Accepting side of the peer mesh.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        tracing::debug!(addr = %inner.local_addr()?, "listener bound");
        Ok(Self { inner })
    }

    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}
