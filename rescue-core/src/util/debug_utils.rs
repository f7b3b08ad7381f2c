use bitcoin::Witness;

/// Debug printer for byte slices, as lowercase hex
pub struct DebugBytes<'a>(pub &'a [u8]);
impl<'a> core::fmt::Debug for DebugBytes<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> Result<(), core::fmt::Error> {
        for i in self.0 {
            write!(f, "{:02x}", i)?;
        }
        Ok(())
    }
}

/// Debug support for a witness stack, one hex element per entry
pub struct DebugWitness<'a>(pub &'a Witness);
impl<'a> core::fmt::Debug for DebugWitness<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> Result<(), core::fmt::Error> {
        f.debug_list().entries(self.0.iter().map(|el| DebugBytes(el))).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_witness_test() {
        let witness = Witness::from_slice(&[vec![0x01u8, 0x02], vec![], vec![0xff]]);
        assert_eq!(format!("{:?}", DebugWitness(&witness)), "[0102, , ff]");
    }
}
