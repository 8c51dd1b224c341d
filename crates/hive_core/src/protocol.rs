//! Envelope MJPEG (`multipart/x-mixed-replace`).
//!
//! Formato de cada parte:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes JPEG>\r\n
//! ```

/// Boundary das partes do stream.
pub const BOUNDARY: &str = "frame";

/// Valor do header `Content-Type` da resposta HTTP.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_PREFIX: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ";
const HEADER_END: &[u8] = b"\r\n\r\n";
const PART_END: &[u8] = b"\r\n";

/// Erros ao decodificar uma parte recebida (ver [`decode_part`]).
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Parte sem boundary --{BOUNDARY}")]
    MissingBoundary,

    #[error("Content-Length inválido")]
    InvalidLength,

    #[error("Parte truncada: esperados {expected} bytes, recebidos {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Monta uma parte completa do stream em volta de um JPEG.
pub fn encode_part(jpeg: &[u8]) -> Vec<u8> {
    let len = jpeg.len().to_string();
    let mut part =
        Vec::with_capacity(PART_PREFIX.len() + len.len() + HEADER_END.len() + jpeg.len() + PART_END.len());
    part.extend_from_slice(PART_PREFIX);
    part.extend_from_slice(len.as_bytes());
    part.extend_from_slice(HEADER_END);
    part.extend_from_slice(jpeg);
    part.extend_from_slice(PART_END);
    part
}

/// Extrai o JPEG de uma parte, validando o `Content-Length`.
///
/// Helper do lado cliente: o servidor só monta partes com [`encode_part`];
/// quem consome o stream (testes, ferramentas de diagnóstico) usa esta
/// função para ler de volta uma parte recebida.
pub fn decode_part(part: &[u8]) -> Result<&[u8], ProtocolError> {
    let rest = part
        .strip_prefix(PART_PREFIX)
        .ok_or(ProtocolError::MissingBoundary)?;

    let header_end = rest
        .windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .ok_or(ProtocolError::InvalidLength)?;

    let expected: usize = std::str::from_utf8(&rest[..header_end])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or(ProtocolError::InvalidLength)?;

    let body = &rest[header_end + HEADER_END.len()..];
    let actual = body.len().saturating_sub(PART_END.len());
    if actual != expected || !body.ends_with(PART_END) {
        return Err(ProtocolError::Truncated { expected, actual });
    }

    Ok(&body[..expected])
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
