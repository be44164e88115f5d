//! OS-local endpoints: Unix domain sockets, or named pipes on Windows.

use std::path::Path;

#[cfg(unix)]
pub use unix::{ClientStream, Listener, ServerStream, connect};
#[cfg(windows)]
pub use windows::{ClientStream, Listener, ServerStream, connect};

#[cfg(unix)]
mod unix {
    use std::{
        io,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
    };

    use {
        tokio::net::{UnixListener, UnixStream},
        tracing::{debug, warn},
    };

    pub type ServerStream = UnixStream;
    pub type ClientStream = UnixStream;

    pub struct Listener {
        inner: UnixListener,
        path: PathBuf,
    }

    impl Listener {
        pub fn bind(path: &Path) -> io::Result<Self> {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                if !dir.exists() {
                    std::fs::create_dir_all(dir)?;
                    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
                }
            }
            // The coordinator lock is held, so any socket file left here is stale.
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed stale socket"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => return Err(e),
            }
            let inner = UnixListener::bind(path)?;
            Ok(Self {
                inner,
                path: path.to_path_buf(),
            })
        }

        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            let (stream, _addr) = self.inner.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket");
            }
        }
    }

    pub async fn connect(path: &Path) -> io::Result<ClientStream> {
        UnixStream::connect(path).await
    }
}

#[cfg(windows)]
mod windows {
    use std::{io, path::Path};

    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    pub type ServerStream = NamedPipeServer;
    pub type ClientStream = NamedPipeClient;

    pub struct Listener {
        name: String,
        next: NamedPipeServer,
    }

    impl Listener {
        pub fn bind(path: &Path) -> io::Result<Self> {
            let name = path.to_string_lossy().into_owned();
            let next = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&name)?;
            Ok(Self { name, next })
        }

        pub async fn accept(&mut self) -> io::Result<ServerStream> {
            self.next.connect().await?;
            let fresh = ServerOptions::new().create(&self.name)?;
            Ok(std::mem::replace(&mut self.next, fresh))
        }
    }

    pub async fn connect(path: &Path) -> io::Result<ClientStream> {
        ClientOptions::new().open(path.as_os_str())
    }
}

/// Whether something is accepting connections at `path`.
pub async fn is_listening(path: &Path) -> bool {
    connect(path).await.is_ok()
}
