use std::net::{SocketAddr, TcpListener};

/// Find a free TCP port in `[start, end]` by actually binding to it.
pub fn find_free_port(start: u16, end: u16) -> Result<u16, std::io::Error> {
    find_free_port_with_bind(start, end, TcpListener::bind)
}

/// Port probing with an injectable bind function so the scan loop is
/// testable without touching real sockets.
pub fn find_free_port_with_bind<F>(start: u16, end: u16, bind: F) -> Result<u16, std::io::Error>
where
    F: Fn(SocketAddr) -> Result<TcpListener, std::io::Error>,
{
    for port in start..=end {
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        if bind(addr).is_ok() {
            return Ok(port);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        format!("no free port found in range {start}-{end}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_find_free_port_skips_taken_ports() {
        let bind_fn = |addr: SocketAddr| {
            if addr.port() == 3002 {
                Ok(TcpListener::bind("127.0.0.1:0").unwrap())
            } else {
                Err(Error::new(ErrorKind::AddrInUse, "port in use"))
            }
        };

        let port = find_free_port_with_bind(3000, 3010, bind_fn).unwrap();
        assert_eq!(port, 3002);
    }

    #[test]
    fn test_find_free_port_no_ports_available() {
        let bind_fn = |_: SocketAddr| Err(Error::new(ErrorKind::AddrInUse, "port in use"));

        let result = find_free_port_with_bind(3000, 3010, bind_fn);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::AddrNotAvailable);
    }

    #[test]
    fn test_find_free_port_binds_for_real() {
        let port = find_free_port(50000, 50100).unwrap();
        assert!((50000..=50100).contains(&port));
    }
}
