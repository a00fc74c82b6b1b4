//! Peer state module
//!
//! Tracks the tit-for-tat flags and advertised bitfield for one remote
//! peer.

use std::net::SocketAddr;

/// State associated with a connected remote peer
///
/// The four boolean flags are the mutual-throttling state of the protocol:
/// who is choking whom, and who wants data from whom.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Peer address
    pub addr: SocketAddr,
    /// Remote peer identifier, learned from the handshake
    pub peer_id: Option<[u8; 20]>,
    /// We're choking them
    pub am_choking: bool,
    /// We're interested in their pieces
    pub am_interested: bool,
    /// They're choking us
    pub peer_choking: bool,
    /// They're interested in our pieces
    pub peer_interested: bool,
    /// Pieces the remote advertises, one bit per piece, MSB-first
    bitfield: Vec<u8>,
}

impl Peer {
    /// Create peer state with the protocol's initial flags
    ///
    /// Both sides start choked and uninterested.
    pub fn new(addr: SocketAddr, num_pieces: usize) -> Self {
        Self {
            addr,
            peer_id: None,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            bitfield: vec![0u8; (num_pieces + 7) / 8],
        }
    }

    /// Replace the bitfield snapshot with the remote's advertisement
    pub fn update_bitfield(&mut self, bitfield: Vec<u8>) {
        self.bitfield = bitfield;
    }

    /// Record a `have` announcement for one piece
    pub fn set_piece(&mut self, piece_index: usize) {
        let byte_index = piece_index / 8;
        if byte_index >= self.bitfield.len() {
            return;
        }
        self.bitfield[byte_index] |= 1 << (7 - (piece_index % 8));
    }

    /// Check whether the remote has a piece
    ///
    /// Bits beyond the known piece count read as "not present".
    pub fn has_piece(&self, piece_index: usize) -> bool {
        let byte_index = piece_index / 8;
        if byte_index >= self.bitfield.len() {
            return false;
        }
        (self.bitfield[byte_index] >> (7 - (piece_index % 8))) & 1 == 1
    }

    /// Number of pieces the remote advertises
    pub fn piece_count(&self) -> usize {
        self.bitfield.iter().map(|byte| byte.count_ones() as usize).sum()
    }

    /// Whether block requests to this peer can currently be served
    pub fn can_request(&self) -> bool {
        !self.peer_choking && self.am_interested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:6881".parse().unwrap()
    }

    #[test]
    fn test_initial_flags() {
        let peer = Peer::new(test_addr(), 16);
        assert!(peer.am_choking);
        assert!(!peer.am_interested);
        assert!(peer.peer_choking);
        assert!(!peer.peer_interested);
        assert!(peer.peer_id.is_none());
        assert!(!peer.can_request());
    }

    #[test]
    fn test_bitfield_msb_first() {
        let mut peer = Peer::new(test_addr(), 16);
        peer.update_bitfield(vec![0b1100_0000, 0b0000_0011]);

        assert!(peer.has_piece(0));
        assert!(peer.has_piece(1));
        assert!(!peer.has_piece(2));
        assert!(peer.has_piece(14));
        assert!(peer.has_piece(15));
    }

    #[test]
    fn test_has_piece_out_of_range_is_false() {
        let mut peer = Peer::new(test_addr(), 8);
        peer.update_bitfield(vec![0xff]);
        assert!(peer.has_piece(7));
        assert!(!peer.has_piece(8));
        assert!(!peer.has_piece(1000));
    }

    #[test]
    fn test_set_piece() {
        let mut peer = Peer::new(test_addr(), 16);
        assert!(!peer.has_piece(10));

        peer.set_piece(10);
        assert!(peer.has_piece(10));
        assert_eq!(peer.piece_count(), 1);

        // Out of range: ignored.
        peer.set_piece(64);
        assert_eq!(peer.piece_count(), 1);
    }

    #[test]
    fn test_can_request_needs_unchoke_and_interest() {
        let mut peer = Peer::new(test_addr(), 8);
        peer.peer_choking = false;
        assert!(!peer.can_request());

        peer.am_interested = true;
        assert!(peer.can_request());

        peer.peer_choking = true;
        assert!(!peer.can_request());
    }

    #[test]
    fn test_piece_count() {
        let mut peer = Peer::new(test_addr(), 16);
        assert_eq!(peer.piece_count(), 0);
        peer.update_bitfield(vec![0b1111_1111, 0b0000_1111]);
        assert_eq!(peer.piece_count(), 12);
    }
}
