use std::net::UdpSocket;

/// Devine l'adresse IP locale de la machine.
///
/// Un socket UDP est "connecté" vers une adresse publique : aucun paquet
/// n'est émis, mais le système choisit l'interface de sortie, dont on lit
/// l'adresse. Retourne `127.0.0.1` si l'opération échoue.
pub fn guess_local_ip() -> String {
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip().to_string();
                }
            }
            "127.0.0.1".to_string()
        }
        Err(_) => "127.0.0.1".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn test_guess_local_ip_returns_valid_ipv4() {
        let ip = guess_local_ip();
        let parsed = ip.parse::<IpAddr>();
        assert!(parsed.is_ok(), "Should return a valid IP address: {}", ip);
        assert!(parsed.unwrap().is_ipv4());
    }
}
