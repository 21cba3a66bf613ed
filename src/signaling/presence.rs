//! Online-Liste der anderen verbundenen Peers

/// Geordnete Liste der anderen Peers, die beim Relay verbunden sind.
///
/// Die eigene ID taucht nie in der Liste auf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    peers: Vec<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ersetzt die Liste komplett (Antwort auf `user-list`)
    pub fn replace(&mut self, users: Vec<String>, local_id: Option<&str>) {
        self.peers.clear();
        for id in users {
            if Some(id.as_str()) == local_id || self.peers.contains(&id) {
                continue;
            }
            self.peers.push(id);
        }
    }

    /// Fügt einen Peer am Ende an, falls noch nicht vorhanden
    pub fn add(&mut self, id: String) -> bool {
        if self.peers.contains(&id) {
            return false;
        }
        self.peers.push(id);
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p != id);
        self.peers.len() != before
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.iter().any(|p| p == id)
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
