//! Codec library loaded at runtime with [`libloading`]
//!
//! Only `freedv_get_version` is required. Every other entry point is looked
//! up on its own; missing ones either clear a [`Capabilities`] flag or make
//! the corresponding method a no-op.

use super::*;

use libloading::Library;

use std::cell::Cell;
use std::ffi::{c_char, c_float, c_int, c_short, c_void};
use std::ptr::{self, NonNull};

type Handle = *mut c_void;

#[repr(C)]
#[allow(dead_code)]
struct RawAdvanced {
    interleave_frames: c_int,
    m: c_int,
    rs: c_int,
    fs: c_int,
    first_tone: c_int,
    tone_spacing: c_int,
    codename: *mut c_char,
}

type VersionFn = unsafe extern "C" fn() -> c_int;
type OpenFn = unsafe extern "C" fn(c_int) -> Handle;
type OpenAdvancedFn = unsafe extern "C" fn(c_int, *mut RawAdvanced) -> Handle;
type CloseFn = unsafe extern "C" fn(Handle);
type TxFn = unsafe extern "C" fn(Handle, *mut c_short, *mut c_short);
type CompTxFn = unsafe extern "C" fn(Handle, *mut Complex<f32>, *mut c_short);
type RxFn = unsafe extern "C" fn(Handle, *mut c_short, *mut c_short) -> c_int;
type CompRxFn = unsafe extern "C" fn(Handle, *mut c_short, *mut Complex<f32>) -> c_int;
type QueryFn = unsafe extern "C" fn(Handle) -> c_int;
type StatsFn = unsafe extern "C" fn(Handle, *mut c_int, *mut c_float);
type SquelchEnFn = unsafe extern "C" fn(Handle, bool);
type SquelchThreshFn = unsafe extern "C" fn(Handle, c_float);
type TxBpfFn = unsafe extern "C" fn(Handle, c_int);
type RxTextFn = unsafe extern "C" fn(*mut c_void, c_char);
type TxTextFn = unsafe extern "C" fn(*mut c_void) -> c_char;
type SetTextFn = unsafe extern "C" fn(Handle, Option<RxTextFn>, Option<TxTextFn>, *mut c_void);

#[derive(Clone, Copy, Default)]
struct Api {
    open: Option<OpenFn>,
    open_advanced: Option<OpenAdvancedFn>,
    close: Option<CloseFn>,
    tx: Option<TxFn>,
    comptx: Option<CompTxFn>,
    rx: Option<RxFn>,
    comprx: Option<CompRxFn>,
    nin: Option<QueryFn>,
    n_speech: Option<QueryFn>,
    n_max_modem: Option<QueryFn>,
    n_nom_modem: Option<QueryFn>,
    sync: Option<QueryFn>,
    stats: Option<StatsFn>,
    speech_rate: Option<QueryFn>,
    modem_rate: Option<QueryFn>,
    squelch_en: Option<SquelchEnFn>,
    squelch_thresh: Option<SquelchThreshFn>,
    tx_bpf: Option<TxBpfFn>,
    set_text: Option<SetTextFn>,
}

/// Look up a symbol, copying the function pointer out
///
/// # Safety
///
/// `T` must match the symbol's actual signature.
unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
    lib.get::<T>(name).ok().map(|sym| *sym)
}

impl Api {
    unsafe fn resolve(lib: &Library) -> Self {
        Self {
            open: symbol(lib, b"freedv_open\0"),
            open_advanced: symbol(lib, b"freedv_open_advanced\0"),
            close: symbol(lib, b"freedv_close\0"),
            tx: symbol(lib, b"freedv_tx\0"),
            comptx: symbol(lib, b"freedv_comptx\0"),
            rx: symbol(lib, b"freedv_rx\0"),
            comprx: symbol(lib, b"freedv_comprx\0"),
            nin: symbol(lib, b"freedv_nin\0"),
            n_speech: symbol(lib, b"freedv_get_n_speech_samples\0"),
            n_max_modem: symbol(lib, b"freedv_get_n_max_modem_samples\0"),
            n_nom_modem: symbol(lib, b"freedv_get_n_nom_modem_samples\0"),
            sync: symbol(lib, b"freedv_get_sync\0"),
            stats: symbol(lib, b"freedv_get_modem_stats\0"),
            speech_rate: symbol(lib, b"freedv_get_speech_sample_rate\0"),
            modem_rate: symbol(lib, b"freedv_get_modem_sample_rate\0"),
            squelch_en: symbol(lib, b"freedv_set_squelch_en\0"),
            squelch_thresh: symbol(lib, b"freedv_set_snr_squelch_thresh\0"),
            tx_bpf: symbol(lib, b"freedv_set_tx_bpf\0"),
            set_text: symbol(lib, b"freedv_set_callback_txt\0"),
        }
    }
    fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::NONE;
        if self.speech_rate.is_some() && self.modem_rate.is_some() {
            caps |= Capabilities::SAMPLE_RATES;
        }
        if self.stats.is_some() {
            caps |= Capabilities::MODEM_STATS;
        }
        if self.open_advanced.is_some() {
            caps |= Capabilities::ADVANCED_OPEN;
        }
        if self.set_text.is_some() {
            caps |= Capabilities::TEXT;
        }
        if self.squelch_en.is_some() && self.squelch_thresh.is_some() {
            caps |= Capabilities::SQUELCH;
        }
        if self.tx_bpf.is_some() {
            caps |= Capabilities::BAND_LIMIT;
        }
        if platform_vector_math() {
            caps |= Capabilities::VECTOR_MATH;
        }
        caps
    }
}

/// [`CodecLoader`] using the platform's dynamic linker
#[derive(Clone, Copy, Default, Debug)]
pub struct DynamicLoader;

impl CodecLoader for DynamicLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn CodecLibrary>, CodecError> {
        // SAFETY: running the library's initializers is inherent to loading it
        let lib = match unsafe { Library::new(path) } {
            Ok(lib) => lib,
            Err(err) if path.exists() => {
                log::debug!("cannot load {:?}: {}", path, err);
                return Err(CodecError::Incompatible {
                    path: path.to_path_buf(),
                });
            }
            Err(_) => return Err(CodecError::NotFound),
        };
        // SAFETY: signature of freedv_get_version
        let version: VersionFn = unsafe { symbol(&lib, b"freedv_get_version\0") }.ok_or_else(
            || CodecError::Incompatible {
                path: path.to_path_buf(),
            },
        )?;
        // SAFETY: signatures as declared by the library's public header
        let (version, api) = unsafe { (version(), Api::resolve(&lib)) };
        Ok(Arc::new(DynamicLibrary {
            caps: api.capabilities(),
            api,
            version,
            lib: Arc::new(lib),
        }))
    }
}

/// Codec library resolved by [`DynamicLoader`]
pub struct DynamicLibrary {
    lib: Arc<Library>,
    api: Api,
    version: i32,
    caps: Capabilities,
}

impl DynamicLibrary {
    fn open_with(&self, open: impl FnOnce() -> Handle) -> Option<Box<dyn CodecSession>> {
        self.api.close?;
        let handle = NonNull::new(open())?;
        Some(Box::new(DynamicSession::new(
            self.lib.clone(),
            self.api,
            handle,
        )))
    }
}

impl CodecLibrary for DynamicLibrary {
    fn version(&self) -> i32 {
        self.version
    }
    fn capabilities(&self) -> Capabilities {
        self.caps
    }
    fn open(&self, mode: VoiceMode) -> Option<Box<dyn CodecSession>> {
        let open = self.api.open?;
        // SAFETY: returns null for unsupported modes
        self.open_with(|| unsafe { open(mode.id() as c_int) })
    }
    fn open_advanced(
        &self,
        mode: VoiceMode,
        params: &AdvancedParams,
    ) -> Option<Box<dyn CodecSession>> {
        let open_advanced = self.api.open_advanced?;
        let mut raw = RawAdvanced {
            interleave_frames: params.interleave_frames as c_int,
            m: 0,
            rs: 0,
            fs: 0,
            first_tone: 0,
            tone_spacing: 0,
            codename: ptr::null_mut(),
        };
        // SAFETY: `raw` outlives the call
        self.open_with(|| unsafe { open_advanced(mode.id() as c_int, &mut raw) })
    }
}

/// Receives the text callbacks of one codec handle
///
/// `current` points to the caller's `&mut dyn TextPort` while a codec call
/// is in progress and is null otherwise.
struct TextSlot {
    current: Cell<*mut c_void>,
}

unsafe extern "C" fn text_rx(state: *mut c_void, c: c_char) {
    let slot = &*(state as *const TextSlot);
    let port = slot.current.get() as *mut &mut dyn TextPort;
    if let Some(port) = port.as_mut() {
        port.put_rx_char(c as u8);
    }
}

unsafe extern "C" fn text_tx(state: *mut c_void) -> c_char {
    let slot = &*(state as *const TextSlot);
    let port = slot.current.get() as *mut &mut dyn TextPort;
    match port.as_mut() {
        Some(port) => port.next_tx_char() as c_char,
        None => b' ' as c_char,
    }
}

/// Open codec handle of a [`DynamicLibrary`]
pub struct DynamicSession {
    _lib: Arc<Library>,
    api: Api,
    handle: NonNull<c_void>,
    text: Box<TextSlot>,
}

// SAFETY: the handle is only used through `&mut self`, never concurrently
unsafe impl Send for DynamicSession {}

impl DynamicSession {
    fn new(lib: Arc<Library>, api: Api, handle: NonNull<c_void>) -> Self {
        let text = Box::new(TextSlot {
            current: Cell::new(ptr::null_mut()),
        });
        if let Some(set_text) = api.set_text {
            // SAFETY: the slot is boxed and lives as long as the handle
            unsafe {
                set_text(
                    handle.as_ptr(),
                    Some(text_rx),
                    Some(text_tx),
                    &*text as *const TextSlot as *mut c_void,
                );
            }
        }
        Self {
            _lib: lib,
            api,
            handle,
            text,
        }
    }
    fn query(&self, f: Option<QueryFn>) -> usize {
        match f {
            // SAFETY: valid handle
            Some(f) => unsafe { f(self.handle.as_ptr()) }.max(0) as usize,
            None => 0,
        }
    }
    fn with_text<R>(&mut self, text: &mut dyn TextPort, call: impl FnOnce(Handle) -> R) -> R {
        let mut port = text;
        self.text
            .current
            .set(&mut port as *mut &mut dyn TextPort as *mut c_void);
        let result = call(self.handle.as_ptr());
        self.text.current.set(ptr::null_mut());
        result
    }
}

impl Drop for DynamicSession {
    fn drop(&mut self) {
        if let Some(close) = self.api.close {
            // SAFETY: handle is closed exactly once
            unsafe { close(self.handle.as_ptr()) }
        }
    }
}

impl CodecSession for DynamicSession {
    fn n_speech_samples(&self) -> usize {
        self.query(self.api.n_speech)
    }
    fn n_max_modem_samples(&self) -> usize {
        self.query(self.api.n_max_modem)
    }
    fn n_nom_modem_samples(&self) -> usize {
        self.query(self.api.n_nom_modem)
    }
    fn nin(&self) -> usize {
        match self.api.nin {
            Some(_) => self.query(self.api.nin),
            None => self.n_nom_modem_samples(),
        }
    }
    fn encode(&mut self, speech: &[i16], modem: &mut [i16], text: &mut dyn TextPort) {
        debug_assert!(modem.len() >= self.n_nom_modem_samples());
        let Some(tx) = self.api.tx else {
            modem.fill(0);
            return;
        };
        // SAFETY: buffers hold a full frame; speech is not written to
        self.with_text(text, |h| unsafe {
            tx(h, modem.as_mut_ptr(), speech.as_ptr() as *mut c_short)
        });
    }
    fn encode_complex(
        &mut self,
        speech: &[i16],
        modem: &mut [Complex<f32>],
        text: &mut dyn TextPort,
    ) {
        debug_assert!(modem.len() >= self.n_nom_modem_samples());
        let Some(comptx) = self.api.comptx else {
            modem.fill(Complex::new(0.0, 0.0));
            return;
        };
        // SAFETY: buffers hold a full frame; speech is not written to
        self.with_text(text, |h| unsafe {
            comptx(h, modem.as_mut_ptr(), speech.as_ptr() as *mut c_short)
        });
    }
    fn decode(&mut self, modem: &[i16], speech: &mut [i16], text: &mut dyn TextPort) -> usize {
        let Some(rx) = self.api.rx else {
            return 0;
        };
        // SAFETY: modem holds `nin` samples and is not written to
        let count = self.with_text(text, |h| unsafe {
            rx(h, speech.as_mut_ptr(), modem.as_ptr() as *mut c_short)
        });
        (count.max(0) as usize).min(speech.len())
    }
    fn decode_complex(
        &mut self,
        modem: &[Complex<f32>],
        speech: &mut [i16],
        text: &mut dyn TextPort,
    ) -> usize {
        let Some(comprx) = self.api.comprx else {
            return 0;
        };
        // SAFETY: modem holds `nin` samples and is not written to
        let count = self.with_text(text, |h| unsafe {
            comprx(h, speech.as_mut_ptr(), modem.as_ptr() as *mut Complex<f32>)
        });
        (count.max(0) as usize).min(speech.len())
    }
    fn sync(&self) -> bool {
        self.query(self.api.sync) != 0
    }
    fn modem_stats(&self) -> (bool, f32) {
        let Some(stats) = self.api.stats else {
            return (self.sync(), f32::NAN);
        };
        let mut sync: c_int = 0;
        let mut snr: c_float = 0.0;
        // SAFETY: out-pointers are valid locals
        unsafe { stats(self.handle.as_ptr(), &mut sync, &mut snr) };
        (sync != 0, snr)
    }
    fn speech_sample_rate(&self) -> u32 {
        match self.query(self.api.speech_rate) {
            0 => DEFAULT_SAMPLE_RATE,
            rate => rate as u32,
        }
    }
    fn modem_sample_rate(&self) -> u32 {
        match self.query(self.api.modem_rate) {
            0 => DEFAULT_SAMPLE_RATE,
            rate => rate as u32,
        }
    }
    fn set_squelch(&mut self, enabled: bool, snr_threshold_db: f32) {
        // SAFETY: valid handle
        unsafe {
            if let Some(squelch_en) = self.api.squelch_en {
                squelch_en(self.handle.as_ptr(), enabled);
            }
            if let Some(squelch_thresh) = self.api.squelch_thresh {
                squelch_thresh(self.handle.as_ptr(), snr_threshold_db);
            }
        }
    }
    fn set_tx_band_limit(&mut self, enabled: bool) {
        if let Some(tx_bpf) = self.api.tx_bpf {
            // SAFETY: valid handle
            unsafe { tx_bpf(self.handle.as_ptr(), enabled as c_int) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_missing_file_is_not_found() {
        assert!(matches!(
            DynamicLoader.load(Path::new("/nonexistent/libcodec2.so")),
            Err(CodecError::NotFound)
        ));
    }
    #[test]
    fn test_non_library_file_is_incompatible() {
        let path = std::env::temp_dir().join("txcore-not-a-library.so");
        std::fs::write(&path, b"not a shared object").unwrap();
        let result = DynamicLoader.load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(CodecError::Incompatible { .. })));
    }
}
