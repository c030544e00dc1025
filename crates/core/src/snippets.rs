//! Device-side code generation
//!
//! The device cannot be extended with an agent, so file transfer and the
//! filesystem walk are driven by small scripts injected through the REPL's
//! paste mode. `\x05` (Ctrl-E) enters paste mode, `\x04` (Ctrl-D) executes
//! the pasted block.

/// Marker the download snippet is located by in the reply. The echoed call
/// line contains it; decoded output starts on the following line.
pub const DOWNLOAD_MARKER: &str = "__downloader__";

/// REPL prompt line that terminates the download output region.
pub const REPL_PROMPT: &str = ">>>";

/// Status line the upload snippet prints on a verification failure.
pub const UPLOAD_FAILED_MARKER: &str = "Upload failed (hash mismatch)!";

/// Status line the upload snippet prints on success.
pub const UPLOAD_SUCCESS_MARKER: &str = "Upload success!";

/// Bytes the device reads per chunk when streaming a file back.
pub const DOWNLOAD_CHUNK: usize = 256;

/// Bytes the device reads from stdin per chunk during upload.
pub const UPLOAD_CHUNK: usize = 64;

/// Wrap a multi-line script in paste-mode framing for injection.
pub fn paste_block(code: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(code.len() + 3);
    out.extend_from_slice(b"\n\x05");
    out.extend_from_slice(code.as_bytes());
    out.push(0x04);
    out
}

/// Script that streams `path` to stdout as base64 chunks.
pub fn downloader(path: &str) -> String {
    format!(
        r#"
def __downloader__():
    import sys
    from ubinascii import b2a_base64
    f = open('{path}', 'rb')
    while True:
        d = f.read({chunk})
        if not d:
            break
        sys.stdout.write(b2a_base64(d))
    f.close()
__downloader__()"#,
        path = path,
        chunk = DOWNLOAD_CHUNK,
    )
}

/// Script that writes exactly `size` bytes from stdin to `filename`, then
/// re-reads the file and verifies its sha256 digest against `expected_hash`.
///
/// Prints `Uploaded: n of i` after each chunk and a final success or
/// hash-mismatch line for the observer to surface.
pub fn uploader(filename: &str, size: usize, expected_hash: &str) -> String {
    format!(
        r#"
def __uploader__():
    import sys
    import uhashlib
    import ubinascii
    filename = '{filename}'
    print('Uploading %s...' % filename)
    f = open(filename, 'wb')
    try:
        i = {size}
        n = 0
        chunk = {chunk}
        while n < i:
            chunk = min(i - n, chunk)
            n += f.write(sys.stdin.read(chunk))
            print('Uploaded: %i of %i' % (n, i))
    except Exception as e:
        print(e)
    finally:
        f.close()
    try:
        print('Verifying...')
        f = open('{filename}', 'rb')
        hash = uhashlib.sha256()
        while True:
            data = f.read({chunk})
            if not data:
                break
            hash.update(data)
        upload_hash = ubinascii.hexlify(hash.digest())
        expected_hash = b'{expected_hash}'
        print('Expected hash: %s' % expected_hash)
        print('Actual hash:   %s' % upload_hash)
        if upload_hash == expected_hash:
            print('{success}')
        else:
            print('{failed}')
    except Exception as e:
        print(e)
    finally:
        f.close()
__uploader__()
"#,
        filename = filename,
        size = size,
        chunk = UPLOAD_CHUNK,
        expected_hash = expected_hash,
        success = UPLOAD_SUCCESS_MARKER,
        failed = UPLOAD_FAILED_MARKER,
    )
}

/// Script that walks the filesystem recursively and leaves the nested
/// result dict as the final expression, which the REPL echoes as one
/// literal line for the host to parse.
pub fn scan_files() -> String {
    r#"
def __scanfiles__(path):
    import os
    files = {}
    try:
        for f in os.listdir(path):
            files[f] = {
                'info': os.stat(f),
                'files': __scanfiles__(path + '/' + f),
                'name': f
            }
    except OSError:
        pass
    return files
__scanfiles__('.')
"#
    .to_string()
}

/// Query that imports a module and dumps its help text.
pub fn module_help(module: &str) -> String {
    format!("import {module}\r\nhelp({module})\r\n", module = module)
}

/// Query that dumps help text for one attribute of a module.
pub fn symbol_help(module: &str, symbol: &str) -> String {
    format!("help({}.{})", module, symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paste_block_framing() {
        let block = paste_block("print(1)");
        assert!(block.starts_with(b"\n\x05"));
        assert!(block.ends_with(b"\x04"));
        assert_eq!(&block[2..block.len() - 1], b"print(1)");
    }

    #[test]
    fn test_downloader_parameterized() {
        let code = downloader("boot.py");
        assert!(code.contains("open('boot.py', 'rb')"));
        assert!(code.contains("f.read(256)"));
        assert!(code.contains("b2a_base64"));
        assert!(code.trim_end().ends_with("__downloader__()"));
    }

    #[test]
    fn test_uploader_contract() {
        let code = uploader("main.py", 1234, "abcd1234");
        assert!(code.contains("filename = 'main.py'"));
        assert!(code.contains("i = 1234"));
        assert!(code.contains("expected_hash = b'abcd1234'"));
        assert!(code.contains("sys.stdin.read"));
        assert!(code.contains(UPLOAD_SUCCESS_MARKER));
        assert!(code.contains(UPLOAD_FAILED_MARKER));
    }

    #[test]
    fn test_scan_files_ends_with_call() {
        let code = scan_files();
        assert!(code.contains("os.listdir"));
        assert!(code.trim_end().ends_with("__scanfiles__('.')"));
    }
}
